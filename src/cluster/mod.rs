//! Cluster Primitives
//!
//! Leader election and service registry built on the coordination
//! contract. Both primitives derive liveness purely from ephemeral-node
//! lifetime plus watch notifications; there is no heartbeat logic here.

mod election;
mod registry;

pub use election::{ElectionParticipant, ParticipantState, RoleCallback};
pub use registry::MembershipRegistry;

use crate::coordination::{CoordinationClient, CreateMode};
use crate::error::Result;

/// Parse the numeric suffix of a sequential node name
/// ("c_0000000042" -> 42)
fn sequence_of(name: &str) -> Option<u64> {
    let (_, digits) = name.rsplit_once('_')?;
    digits.parse().ok()
}

/// Sort sequential node names by their numeric suffix
///
/// The service zero-pads suffixes, so lexicographic order usually agrees,
/// but the counter can outgrow the pad width; parsing the number instead
/// of trusting the padding keeps the ordering correct. Names without a
/// parsable suffix sort last, by raw comparison.
fn sort_by_sequence(names: &mut [String]) {
    names.sort_by(|a, b| match (sequence_of(a), sequence_of(b)) {
        (Some(left), Some(right)) => left.cmp(&right).then_with(|| a.cmp(b)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
}

/// Create a persistent node if it does not exist yet
///
/// Losing the creation race to a peer counts as success.
async fn ensure_node(client: &dyn CoordinationClient, path: &str) -> Result<()> {
    if client.exists(path, false).await?.is_some() {
        return Ok(());
    }
    match client.create(path, &[], CreateMode::Persistent).await {
        Ok(_) => Ok(()),
        Err(err) if err.is_node_exists() => Ok(()),
        Err(err) => Err(err),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::memory::MemoryCoordination;

    #[test]
    fn test_sequence_parsing() {
        assert_eq!(sequence_of("c_0000000042"), Some(42));
        assert_eq!(sequence_of("n_0000000000"), Some(0));
        assert_eq!(sequence_of("c_10000000000"), Some(10_000_000_000));
        assert_eq!(sequence_of("leader"), None);
    }

    #[test]
    fn test_sort_by_sequence_ignores_padding() {
        let mut names = vec![
            "c_10000000000".to_string(),
            "c_0000000003".to_string(),
            "c_0000000001".to_string(),
        ];
        sort_by_sequence(&mut names);

        // Raw string order would put c_10000000000 before c_3.
        assert_eq!(names, vec!["c_0000000001", "c_0000000003", "c_10000000000"]);
    }

    #[test]
    fn test_sort_unparsable_names_last() {
        let mut names = vec![
            "standby".to_string(),
            "c_0000000002".to_string(),
            "c_0000000001".to_string(),
        ];
        sort_by_sequence(&mut names);

        assert_eq!(names, vec!["c_0000000001", "c_0000000002", "standby"]);
    }

    #[tokio::test]
    async fn test_ensure_node_tolerates_existing() {
        let service = MemoryCoordination::new();
        let session = service.session();

        ensure_node(session.as_ref(), "/election").await.unwrap();
        ensure_node(session.as_ref(), "/election").await.unwrap();

        assert!(session.exists("/election", false).await.unwrap().is_some());
    }
}
