// src/main.rs

use reqwest::Client;
use serde::Deserialize;
use std::env;
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct DeviceAggregate {
    device_id: String,
    display_name: Option<String>,
    department: Option<String>,
    monthly_hours_prorated_sum: f64,
    monthly_load_prorated_sum: f64,
    shortage_prorated: f64,
}

#[derive(Debug, Deserialize)]
struct WeeklyAvailability {
    week_number: u32,
    iso_year: i32,
    prorated_hours: f64,
    prorated_load_hours: f64,
}

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    device_id: String,
    working_days_in_month: u32,
    weekly: Vec<WeeklyAvailability>,
    shortage_full: f64,
    shortage_prorated: f64,
}

#[derive(Debug, Deserialize)]
struct DevicePartLoad {
    part_number: String,
    week: u32,
    year: i32,
    praca_tpz: f64,
    order_id: Option<String>,
}

/// Usage: capacity-test-client [BASE_URL] YYYY-MM [YYYY-MM ...]
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let base_url = args
        .next()
        .or_else(|| env::var("CAPACITY_URL").ok())
        .unwrap_or_else(|| "http://localhost:8000".to_string());
    let mut months: Vec<String> = args.collect();
    if months.is_empty() {
        match env::var("CAPACITY_MONTH") {
            Ok(month) => months.push(month),
            Err(_) => {
                println!("Usage: capacity-test-client [BASE_URL] YYYY-MM [YYYY-MM ...]");
                println!("(or set CAPACITY_MONTH)");
                return Ok(());
            }
        }
    }
    let month_query = months
        .iter()
        .map(|m| format!("month={}", m))
        .collect::<Vec<_>>()
        .join("&");
    let client = Client::new();

    // Test 1: Health check
    println!("\n🔍 Testing health check endpoint...");
    let health_response = client
        .get(format!("{}/health", base_url))
        .send()
        .await?
        .json::<HealthResponse>()
        .await?;
    println!("Health check response: {:?}", health_response);

    // Test 2: Table status
    println!("\n🔍 Testing status endpoint...");
    let status_response = client.get(format!("{}/status", base_url)).send().await?;
    println!("Status endpoint status: {}", status_response.status());
    println!("Status endpoint body: {}", status_response.text().await?);

    // Test 3: Device aggregates
    println!("\n🔍 Testing devices endpoint for {:?}...", months);
    let response = client
        .get(format!("{}/devices?{}", base_url, month_query))
        .send()
        .await?;
    if !response.status().is_success() {
        println!("Devices request failed: {}", response.status());
        println!("Body: {}", response.text().await?);
        return Ok(());
    }
    let devices = response.json::<Vec<DeviceAggregate>>().await?;
    println!("{} device(s) returned", devices.len());
    for device in devices.iter().take(10) {
        println!(
            "  {:<16} {:<24} {:<16} avail {:>8.1}h  load {:>8.1}h  shortage {:>8.1}h",
            device.device_id,
            device.display_name.as_deref().unwrap_or("-"),
            device.department.as_deref().unwrap_or("-"),
            device.monthly_hours_prorated_sum,
            device.monthly_load_prorated_sum,
            device.shortage_prorated
        );
    }

    let Some(first) = devices.first() else {
        println!("\n⚠️ No devices with data in the selected months, skipping device tests.");
        return Ok(());
    };

    // Test 4: Availability of the most overloaded device
    println!("\n🔍 Testing availability endpoint for {}...", first.device_id);
    let availability = client
        .get(format!(
            "{}/availability/{}?{}&prorate=true",
            base_url, first.device_id, month_query
        ))
        .send()
        .await?
        .json::<AvailabilityResponse>()
        .await?;
    println!(
        "Device {}: {} working day(s), shortage full {:.1}h, prorated {:.1}h",
        availability.device_id,
        availability.working_days_in_month,
        availability.shortage_full,
        availability.shortage_prorated
    );
    for week in &availability.weekly {
        println!(
            "  {}-W{:02}: {:.1}h available, {:.1}h load",
            week.iso_year, week.week_number, week.prorated_hours, week.prorated_load_hours
        );
    }

    // Test 5: Parts behind the load
    println!("\n🔍 Testing device_parts endpoint for {}...", first.device_id);
    let parts = client
        .get(format!(
            "{}/device_parts/{}?{}",
            base_url, first.device_id, month_query
        ))
        .send()
        .await?
        .json::<Vec<DevicePartLoad>>()
        .await?;
    println!("{} part row(s)", parts.len());
    for part in parts.iter().take(10) {
        println!(
            "  {} (order {}) {}-W{:02}: {:.1}h",
            part.part_number,
            part.order_id.as_deref().unwrap_or("-"),
            part.year,
            part.week,
            part.praca_tpz
        );
    }

    println!("\n✅ All tests completed!");
    Ok(())
}
