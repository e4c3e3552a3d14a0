//! List command implementation.

use super::{open_store, print_json, Format};
use crate::error::CliResult;
use outbox_core::QueuedMutation;
use std::path::Path;

/// Returns queued mutations in replay order.
pub fn list(path: &Path, limit: Option<usize>) -> CliResult<Vec<QueuedMutation>> {
    let store = open_store(path)?;
    Ok(store.peek(limit.unwrap_or(usize::MAX))?)
}

/// Runs the list command.
pub fn run(path: &Path, limit: Option<usize>, format: Format) -> CliResult<()> {
    let mutations = list(path, limit)?;
    match format {
        Format::Json => print_json(&mutations)?,
        Format::Text => {
            if mutations.is_empty() {
                println!("Queue is empty");
                return Ok(());
            }
            println!(
                "{:<40} {:<24} {:>15} {:>7}",
                "ID", "OPERATION", "CREATED_AT", "RETRIES"
            );
            for m in &mutations {
                println!(
                    "{:<40} {:<24} {:>15} {:>7}",
                    m.id.as_str(),
                    m.operation_name,
                    m.created_at,
                    m.retry_count
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixture;
    use tempfile::tempdir;

    #[test]
    fn lists_oldest_first() {
        let dir = tempdir().unwrap();
        fixture::seed(dir.path());

        let ids: Vec<_> = list(dir.path(), None)
            .unwrap()
            .into_iter()
            .map(|m| m.id.as_str().to_string())
            .collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[test]
    fn honours_limit() {
        let dir = tempdir().unwrap();
        fixture::seed(dir.path());

        let listed = list(dir.path(), Some(1)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.as_str(), "b");
    }

    #[test]
    fn json_uses_camel_case() {
        let dir = tempdir().unwrap();
        fixture::seed(dir.path());

        let json = serde_json::to_value(list(dir.path(), Some(1)).unwrap()).unwrap();
        assert_eq!(json[0]["operationName"], "CreateNote");
        assert_eq!(json[0]["tenantId"], "tenant-1");
    }
}
