//! `taskcal request`: raw request passthrough

use std::io::Read;

use crate::dispatch::Dispatcher;
use crate::error::Result;

/// Dispatch `body` (or stdin) and print the response envelope as-is
pub async fn run(dispatcher: &mut Dispatcher, body: Option<String>) -> Result<i32> {
    let body = match body {
        Some(body) => body,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let response = dispatcher.dispatch_json(&body).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.exit_code())
}
