//! Ref layout (spec §6 "Ref layout").

pub fn writer_tip_ref(graph: &str, writer_id: &str) -> String {
    format!("refs/warp/{graph}/writers/{writer_id}")
}

pub fn checkpoint_ref(graph: &str) -> String {
    format!("refs/warp/{graph}/checkpoint")
}

/// Octopus-merge replication marker over every observed writer tip.
pub fn coverage_ref(graph: &str) -> String {
    format!("refs/warp/{graph}/coverage")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_names_match_the_documented_layout() {
        assert_eq!(writer_tip_ref("g1", "w1"), "refs/warp/g1/writers/w1");
        assert_eq!(checkpoint_ref("g1"), "refs/warp/g1/checkpoint");
        assert_eq!(coverage_ref("g1"), "refs/warp/g1/coverage");
    }
}
