//! # Page Recorder Example
//!
//! Records a short interaction with an in-memory page through the async
//! driver, then scrubs the page back and forth through the recording.

use std::time::Duration;
use stratoswarm_page_recorder::mock::MockDocument;
use stratoswarm_page_recorder::*;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&LogConfig::default())?;

    println!("Starting Page Recorder Example");
    println!("==============================");

    // Step 1: Build a small page with one interactive element
    let page = MockDocument::new();
    let root = page.root();
    let body = page.append_child(root, "body");
    let panel = page.append_child(body, "section");
    let button = page.append_child(panel, "button");
    page.add_listener(button, "click", Some("togglePanel"));
    page.set_attribute(panel, "hidden", Some(""))?;

    // Step 2: Spawn the recorder
    let (driver, mut outbound) = PageRecorder::builder()
        .with_debounce_ms(50)
        .spawn(root, page.clone())?;

    driver.host(HostMessage::Start)?;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Step 3: The user clicks; the page reacts and repaints
    driver.send(DriverInput::Interaction {
        node: button,
        event_type: "click".to_string(),
    })?;
    page.set_attribute(panel, "hidden", None)?;
    page.set_attribute(button, "aria-pressed", Some("true"))?;
    driver.send(DriverInput::Mutations(page.take_mutations()))?;
    driver.send(DriverInput::Paint)?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Step 4: Stop and collect the log
    driver.host(HostMessage::Stop)?;

    let mut log = Vec::new();
    while let Some(message) = outbound.recv().await {
        match message {
            ContentMessage::OnChange { record, .. } => {
                println!("  recorded #{} ({})", record.sequence_id, record.kind());
            }
            ContentMessage::OnStop { records, nodes } => {
                log = transport::deserialize(records, nodes)?;
                break;
            }
            ContentMessage::Error { message } => println!("  error: {}", message),
            ContentMessage::OnScreenshot { .. } => {}
        }
    }

    println!("\nRecorded {} changes:", log.len());
    for record in &log {
        println!("  [{:>6.1} ms] {}", record.timestamp, record);
    }

    // Step 5: Scrub back to the first record and forward to the last
    driver.host(HostMessage::MoveTo { index: 0 })?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    println!("\nAt record 0, panel attributes: {:?}", page.attributes(panel));

    let last = log.len() as isize - 1;
    driver.host(HostMessage::MoveTo { index: last })?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    println!("At record {}, panel attributes: {:?}", last, page.attributes(panel));

    driver.host(HostMessage::GetScreenshot { id: 1 })?;
    if let Some(ContentMessage::OnScreenshot { id, image }) = outbound.recv().await {
        match image {
            Some(image) => println!("\nScreenshot for record {}: {}", id, image.data_url),
            None => println!("\nNo screenshot for record {}", id),
        }
    }

    driver.shutdown().await?;
    println!("\nDone");
    Ok(())
}
