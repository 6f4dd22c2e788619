use super::{NodeSet, NodeSetError};

fn names(set: &NodeSet) -> Vec<&str> {
    set.iter().map(String::as_str).collect()
}

#[test]
pub fn expand_ranges_and_singles() {
    let set: NodeSet = "node[1-3,7],login1".parse().unwrap();

    assert_eq!(
        names(&set),
        vec!["login1", "node1", "node2", "node3", "node7"]
    );
}

#[test]
pub fn expand_keeps_zero_padding() {
    let set: NodeSet = "rack[08-11]".parse().unwrap();

    assert_eq!(names(&set), vec!["rack08", "rack09", "rack10", "rack11"]);
}

#[test]
pub fn expand_whitespace_separated() {
    let set: NodeSet = "n1 n2\nn3".parse().unwrap();

    assert_eq!(set.len(), 3);
    assert!(set.contains("n3"));
}

#[test]
pub fn empty_string_is_empty_set() {
    assert!("".parse::<NodeSet>().unwrap().is_empty());
}

#[test]
pub fn compress_consecutive_nodes() {
    let set: NodeSet = ["n1", "n2", "n3", "n7", "n10", "gpu"].into_iter().collect();

    assert_eq!(set.to_string(), "gpu,n[1-3,7,10]");
}

#[test]
pub fn compress_single_node_without_brackets() {
    let set: NodeSet = ["n12"].into_iter().collect();

    assert_eq!(set.to_string(), "n12");
}

#[test]
pub fn compressed_form_expands_to_same_set() {
    let set: NodeSet = "a[01-03,09-10],b[9-11],c".parse().unwrap();
    let compressed = set.to_string();

    assert_eq!(compressed.parse::<NodeSet>().unwrap(), set);
}

#[test]
pub fn difference_removes_down_nodes() {
    let job: NodeSet = "n[1-4]".parse().unwrap();
    let down: NodeSet = "n[2,4],n9".parse().unwrap();

    assert_eq!(job.difference(&down).to_string(), "n[1,3]");
    assert_eq!(job.intersection(&down).to_string(), "n[2,4]");
    assert_eq!(job.union(&down).len(), 5);
}

#[test]
pub fn reject_unbalanced_brackets() {
    assert!(matches!(
        "n[1-3".parse::<NodeSet>(),
        Err(NodeSetError::UnbalancedBrackets(_))
    ));
    assert!(matches!(
        "n1-3]".parse::<NodeSet>(),
        Err(NodeSetError::UnbalancedBrackets(_))
    ));
}

#[test]
pub fn reject_reversed_range() {
    assert!(matches!(
        "n[5-2]".parse::<NodeSet>(),
        Err(NodeSetError::InvalidRange(_))
    ));
    assert!(matches!(
        "n[a-b]".parse::<NodeSet>(),
        Err(NodeSetError::InvalidRange(_))
    ));
}
