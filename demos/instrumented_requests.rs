use std::error::Error;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use apigee_rs_sdk::app::{ApigeeClient, ApigeeClientOptions};
use apigee_rs_sdk::monitoring::{MemoryMetricsReporter, MonitoringOptions};
use apigee_rs_sdk::net::{HttpMethod, SerialQueue};

fn main() -> Result<(), Box<dyn Error>> {
    // Placeholder identifiers; replace them with your organization and application.
    let options = ApigeeClientOptions {
        url_terms: Some("client_id=demo-client".into()),
        monitoring: MonitoringOptions {
            sampling_rate: 100,
            ..Default::default()
        },
        ..Default::default()
    };

    // Keep the records in memory so they can be printed below.
    let reporter = Arc::new(MemoryMetricsReporter::new());
    let client = ApigeeClient::builder("demo-org", "sandbox")
        .options(options)
        .reporter(reporter.clone())
        .build()?;
    println!(
        "Client for {} ready, interception installed: {}",
        client.identification().unique_identifier(),
        client.installed_interception()
    );

    // A blocking call.
    let request = client.request(HttpMethod::Get, "users?limit=1")?;
    let completion = client.send_synchronous_request(&request);
    println!(
        "sync: status {:?}, error {:?}",
        completion.response.as_ref().map(|response| response.status),
        completion.error
    );

    // The same call with a completion handler delivered on a serial queue.
    let queue = Arc::new(SerialQueue::new("demo-callbacks")?);
    let (tx, rx) = mpsc::channel();
    client.send_asynchronous_request(
        request,
        queue,
        Box::new(move |completion| {
            let _ = tx.send(completion.data.map(|data| data.len()));
        }),
    );
    println!("async: {:?} bytes", rx.recv_timeout(Duration::from_secs(30))?);

    futures::executor::block_on(client.flush())?;
    for record in futures::executor::block_on(reporter.records()) {
        println!(
            "{} {} -> {:?} in {:?}",
            record.http_method(),
            record.url(),
            record.outcome(),
            record.duration()
        );
    }

    Ok(())
}
