//! Integration tests for the Outscale client
//!
//! These tests require a real Outscale account.
//! Set OSC_ACCESS_KEY, OSC_SECRET_KEY and OSC_REGION environment variables to run.

use osc_client::{Credentials, OscClient, OscClientTrait, ResourceFilter};

fn client_from_env() -> OscClient {
    let region = std::env::var("OSC_REGION").unwrap_or_else(|_| "eu-west-2".to_string());
    let credentials = Credentials {
        access_key: std::env::var("OSC_ACCESS_KEY")
            .expect("OSC_ACCESS_KEY environment variable must be set"),
        secret_key: std::env::var("OSC_SECRET_KEY")
            .expect("OSC_SECRET_KEY environment variable must be set"),
    };
    let endpoint = std::env::var("OSC_ENDPOINT_API").ok();

    OscClient::new(region, endpoint, credentials).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires Outscale credentials
async fn test_validate_credentials() {
    let client = client_from_env();
    client
        .validate_credentials()
        .await
        .expect("Failed to validate credentials");
}

#[tokio::test]
#[ignore]
async fn test_read_subregions() {
    let client = client_from_env();
    let subregions = client
        .read_subregions()
        .await
        .expect("Failed to read subregions");

    println!("Found {} subregions", subregions.len());
    assert!(subregions
        .iter()
        .all(|s| s.subregion_name.starts_with(client.region())));
}

#[tokio::test]
#[ignore]
async fn test_read_tagged_subnets() {
    let client = client_from_env();
    let filter = ResourceFilter::new().tag_key("OscK8sRole/service");
    let subnets = client
        .read_subnets(&filter)
        .await
        .expect("Failed to read subnets");

    for subnet in &subnets {
        println!("{} in {}", subnet.subnet_id, subnet.subregion_name);
    }
}

#[tokio::test]
#[ignore]
async fn test_read_load_balancers() {
    let client = client_from_env();
    let lbs = client
        .read_load_balancers(&ResourceFilter::new())
        .await
        .expect("Failed to read load balancers");

    println!("Found {} load balancers", lbs.len());
}
