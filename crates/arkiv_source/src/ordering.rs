use std::collections::{HashMap, HashSet};

/// Order tables so that every child precedes the tables it references.
///
/// Starting from the input in encounter order, each table's referenced
/// parents are pulled to the position immediately after it: a parent already
/// placed later stays where it is, a parent placed earlier is moved, and an
/// unknown parent is inserted. Parents pulled in this way may themselves be
/// absent from the input; they end up in the list purely for ordering.
pub fn order_by_foreign_keys(
    tables: &[String],
    parents_of: &HashMap<String, Vec<String>>,
) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();

    for table in tables {
        if !ordered.contains(table) {
            ordered.push(table.clone());
        }

        for parent in parents_of.get(table).into_iter().flatten() {
            if parent == table {
                // self-referencing key, nothing to reorder
                continue;
            }

            if let Some(parent_pos) = ordered.iter().position(|t| t == parent) {
                let child_pos = ordered
                    .iter()
                    .position(|t| t == table)
                    .unwrap_or(parent_pos);
                if parent_pos > child_pos {
                    continue;
                }
                ordered.remove(parent_pos);
            }

            let child_pos = ordered.iter().position(|t| t == table).unwrap_or(0);
            ordered.insert(child_pos + 1, parent.clone());
        }
    }

    ordered
}

/// Tables sitting on a foreign-key cycle among the given edges.
///
/// Deletes on these tables cannot be ordered child-first and run with
/// foreign key checks suspended instead.
pub fn circular_tables(
    tables: &[String],
    parents_of: &HashMap<String, Vec<String>>,
) -> HashSet<String> {
    let mut circular = HashSet::new();
    let mut done: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        parents_of: &'a HashMap<String, Vec<String>>,
        path: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
        circular: &mut HashSet<String>,
    ) {
        if done.contains(node) {
            return;
        }
        if let Some(start) = path.iter().position(|n| *n == node) {
            for member in &path[start..] {
                circular.insert((*member).to_string());
            }
            return;
        }

        path.push(node);
        for parent in parents_of.get(node).into_iter().flatten() {
            visit(parent, parents_of, path, done, circular);
        }
        path.pop();
        done.insert(node);
    }

    for table in tables {
        visit(table, parents_of, &mut path, &mut done, &mut circular);
    }
    circular
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn edges(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(child, parents)| (child.to_string(), strings(parents)))
            .collect()
    }

    #[test]
    fn children_end_up_before_their_parents() {
        // child references parent: deleting child first avoids violations
        let ordered = order_by_foreign_keys(
            &strings(&["parent", "child"]),
            &edges(&[("child", &["parent"])]),
        );
        let child = ordered.iter().position(|t| t == "child").unwrap();
        let parent = ordered.iter().position(|t| t == "parent").unwrap();
        assert!(child < parent);
    }

    #[test]
    fn parent_already_placed_after_its_child_is_left_alone() {
        // composite keys surface the same referred table once per column
        let ordered = order_by_foreign_keys(
            &strings(&["child"]),
            &edges(&[("child", &["parent", "parent"])]),
        );
        assert_eq!(ordered, strings(&["child", "parent"]));
    }

    #[test]
    fn unknown_parents_are_inserted_after_their_child() {
        let ordered = order_by_foreign_keys(
            &strings(&["a", "b"]),
            &edges(&[("a", &["shadow"])]),
        );
        assert_eq!(ordered, strings(&["a", "shadow", "b"]));
    }

    #[test]
    fn chains_are_fully_ordered() {
        // grandchild -> child -> parent
        let ordered = order_by_foreign_keys(
            &strings(&["grandchild", "child", "parent"]),
            &edges(&[("child", &["parent"]), ("grandchild", &["child"])]),
        );
        let pos = |name: &str| ordered.iter().position(|t| t == name).unwrap();
        assert!(pos("grandchild") < pos("child"));
        assert!(pos("child") < pos("parent"));
    }

    #[test]
    fn cycles_are_detected_and_membership_is_exact() {
        let parents = edges(&[("a", &["b"]), ("b", &["a"]), ("c", &["a"])]);
        let circular = circular_tables(&strings(&["a", "b", "c"]), &parents);
        assert!(circular.contains("a"));
        assert!(circular.contains("b"));
        assert!(!circular.contains("c"));
    }

    #[test]
    fn self_referencing_table_is_circular_but_sortable() {
        let parents = edges(&[("tree", &["tree"])]);
        let ordered = order_by_foreign_keys(&strings(&["tree"]), &parents);
        assert_eq!(ordered, strings(&["tree"]));
        let circular = circular_tables(&strings(&["tree"]), &parents);
        assert!(circular.contains("tree"));
    }

    #[test]
    fn acyclic_graphs_yield_no_circular_tables() {
        let parents = edges(&[("child", &["parent"])]);
        assert!(circular_tables(&strings(&["child", "parent"]), &parents).is_empty());
    }
}
