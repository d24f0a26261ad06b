//! Command execution.

use crate::Commands;
use colored::Colorize;
use evstore_client::{
    ChannelListener, EventData, EventReadStatus, EventStoreClient, Position, ResolvedEvent,
    SliceReadStatus, SubscriptionEvent,
};

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(
    client: &EventStoreClient,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Append {
            stream,
            event_type,
            data,
            metadata,
            expected_version,
        } => {
            let data = parse_json_arg(&data)?;
            let mut event = EventData::json(event_type, &data)?;
            if let Some(metadata) = metadata {
                event = event.with_metadata(serde_json::to_vec(&parse_json_arg(&metadata)?)?);
            }
            let result = client
                .append_to_stream(&stream, expected_version, vec![event], None)
                .await?;
            Ok(format!(
                "{} to {} (next expected version: {}, position: {})",
                "Appended".green(),
                stream.cyan(),
                result.next_expected_version,
                result.log_position
            ))
        }

        Commands::Read {
            stream,
            from,
            count,
            backward,
            resolve_links,
        } => {
            let slice = if backward {
                client
                    .read_stream_events_backward(&stream, from, count, resolve_links, None)
                    .await?
            } else {
                client
                    .read_stream_events_forward(&stream, from, count, resolve_links, None)
                    .await?
            };
            match slice.status {
                SliceReadStatus::StreamNotFound => {
                    return Ok(format!("Stream {} not found", stream.cyan()).yellow().to_string())
                }
                SliceReadStatus::StreamDeleted => {
                    return Ok(format!("Stream {} was deleted", stream.cyan()).red().to_string())
                }
                SliceReadStatus::Success => {}
            }

            let mut output = format_events(&slice.events);
            output.push_str(
                &format!(
                    "next: {}, last: {}, end of stream: {}",
                    slice.next_event_number, slice.last_event_number, slice.is_end_of_stream
                )
                .dimmed()
                .to_string(),
            );
            Ok(output)
        }

        Commands::ReadEvent {
            stream,
            number,
            resolve_links,
        } => {
            let result = client
                .read_event(&stream, number, resolve_links, None)
                .await?;
            match (result.status, result.event) {
                (EventReadStatus::Success, Some(event)) => Ok(format_events(&[event])),
                (EventReadStatus::Success, None) | (EventReadStatus::NotFound, _) => {
                    Ok(format!("Event {}@{} not found", number, stream.cyan())
                        .yellow()
                        .to_string())
                }
                (EventReadStatus::NoStream, _) => {
                    Ok(format!("Stream {} not found", stream.cyan()).yellow().to_string())
                }
                (EventReadStatus::StreamDeleted, _) => {
                    Ok(format!("Stream {} was deleted", stream.cyan()).red().to_string())
                }
            }
        }

        Commands::ReadAll {
            commit,
            prepare,
            count,
            backward,
            resolve_links,
        } => {
            let position = Position::new(commit, prepare);
            let slice = if backward {
                client
                    .read_all_events_backward(position, count, resolve_links, None)
                    .await?
            } else {
                client
                    .read_all_events_forward(position, count, resolve_links, None)
                    .await?
            };
            let mut output = format_events(&slice.events);
            output.push_str(
                &format!("next position: {}", slice.next_position)
                    .dimmed()
                    .to_string(),
            );
            Ok(output)
        }

        Commands::Delete {
            stream,
            expected_version,
            hard,
        } => {
            let result = client
                .delete_stream(&stream, expected_version, hard, None)
                .await?;
            let verb = if hard { "Hard deleted" } else { "Deleted" };
            Ok(format!(
                "{} stream {} (position: {})",
                verb.green(),
                stream.cyan(),
                result.log_position
            ))
        }

        Commands::SetMetadata {
            stream,
            metadata,
            expected_version,
        } => {
            let metadata = parse_json_arg(&metadata)?;
            let result = client
                .set_stream_metadata(&stream, expected_version, &metadata, None)
                .await?;
            Ok(format!(
                "{} metadata of {} (metastream version: {})",
                "Updated".green(),
                stream.cyan(),
                result.next_expected_version
            ))
        }

        Commands::Subscribe { .. } => Err("subscribe runs as a long-lived command".into()),
    }
}

/// Prints live events until Ctrl+C or until the subscription is dropped.
pub async fn subscribe(
    client: &EventStoreClient,
    stream: Option<String>,
    resolve_links: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (listener, mut events) = ChannelListener::new();
    let subscription = match &stream {
        Some(stream) => {
            client
                .subscribe_to_stream(stream, resolve_links, listener, None)
                .await?
        }
        None => client.subscribe_to_all(resolve_links, listener, None).await?,
    };

    eprintln!(
        "{} {} (last commit position: {})",
        "Subscribed to".green(),
        subscription.target().to_string().cyan(),
        subscription.last_commit_position()
    );
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SubscriptionEvent::Event(event)) => {
                    print!("{}", format_events(&[event]));
                }
                Some(SubscriptionEvent::Confirmed(_)) => {}
                Some(SubscriptionEvent::Dropped { reason, error }) => {
                    match error {
                        Some(e) => eprintln!("{}: {} ({})", "Subscription dropped".red(), reason, e),
                        None => eprintln!("{}: {}", "Subscription dropped".yellow(), reason),
                    }
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping subscription...".dimmed());
                subscription.unsubscribe();
                break;
            }
        }
    }

    Ok(())
}

fn format_events(events: &[ResolvedEvent]) -> String {
    if events.is_empty() {
        return format!("{}\n", "No events".yellow());
    }

    let mut output = String::new();
    for resolved in events {
        let Some(event) = resolved.event.as_ref() else {
            continue;
        };
        let data = if event.is_json {
            String::from_utf8_lossy(&event.data).to_string()
        } else {
            format!("<{} bytes>", event.data.len())
        };
        output.push_str(&format!(
            "{}@{} {} {}\n",
            event.event_number.to_string().bold(),
            event.stream_id.cyan(),
            event.event_type.yellow(),
            data
        ));
    }
    output
}

/// Parses a JSON argument, or reads it from a file when prefixed with `@`.
fn parse_json_arg(arg: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}
