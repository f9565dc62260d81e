//! Relationship graph from foreign-key metadata

use crate::database::traits::PluginError;
use crate::schema::{GraphUnit, Relation, RelationshipType, StorageUnit, TableMetadata};
use futures_util::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::future::Future;

/// Introspect every listed unit concurrently
pub async fn collect_metadata<F, Fut>(units: &[StorageUnit], fetch: F) -> Result<Vec<TableMetadata>, PluginError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<TableMetadata, PluginError>>,
{
    try_join_all(units.iter().map(|unit| fetch(unit.name.clone()))).await
}

#[derive(Default)]
struct Edges {
    by_unit: HashMap<String, Vec<Relation>>,
}

impl Edges {
    fn add(&mut self, source: &str, target: &str, relationship: RelationshipType) {
        let relations = self.by_unit.entry(source.to_string()).or_default();
        let relation = Relation {
            name: target.to_string(),
            relationship,
        };
        if !relations.contains(&relation) {
            relations.push(relation);
        }
    }
}

/// Derive the graph of a schema
///
/// One [`GraphUnit`] is emitted per listed unit, in listing order. A foreign
/// key from a column that alone identifies its row to the target's primary
/// key is one-to-one in both directions; any other foreign key is
/// many-to-one with the inverse one-to-many on the target. A unit whose only
/// two foreign-key columns point at two distinct other units joins them
/// many-to-many. Relations to units missing from the listing are dropped.
pub fn build_graph(units: &[StorageUnit], metadata: &[TableMetadata]) -> Vec<GraphUnit> {
    let listed: HashSet<&str> = units.iter().map(|unit| unit.name.as_str()).collect();
    let tables: HashMap<&str, &TableMetadata> = metadata.iter().map(|table| (table.name.as_str(), table)).collect();

    let mut edges = Edges::default();

    for unit in units {
        let Some(table) = tables.get(unit.name.as_str()) else {
            continue;
        };

        for foreign_key in &table.foreign_keys {
            let target = foreign_key.references_table.as_str();
            if !listed.contains(target) {
                continue;
            }

            let references_primary_key = tables
                .get(target)
                .map(|target_table| {
                    target_table.primary_key.len() == 1 && target_table.is_primary_key(&foreign_key.references_column)
                })
                .unwrap_or(false);

            if table.is_unique_column(&foreign_key.column) && references_primary_key {
                edges.add(&table.name, target, RelationshipType::OneToOne);
                edges.add(target, &table.name, RelationshipType::OneToOne);
            } else {
                edges.add(&table.name, target, RelationshipType::ManyToOne);
                edges.add(target, &table.name, RelationshipType::OneToMany);
            }
        }

        if let Some((left, right)) = junction_targets(table, &listed) {
            edges.add(left, right, RelationshipType::ManyToMany);
            edges.add(right, left, RelationshipType::ManyToMany);
        }
    }

    units
        .iter()
        .map(|unit| GraphUnit {
            unit: unit.clone(),
            relations: edges.by_unit.remove(&unit.name).unwrap_or_default(),
        })
        .collect()
}

/// The two units joined by a junction table, if `table` is one
fn junction_targets<'t>(table: &'t TableMetadata, listed: &HashSet<&str>) -> Option<(&'t str, &'t str)> {
    let mut columns: Vec<&str> = table.foreign_keys.iter().map(|key| key.column.as_str()).collect();
    columns.sort_unstable();
    columns.dedup();
    if columns.len() != 2 {
        return None;
    }

    let mut targets: Vec<&str> = Vec::new();
    for column in columns {
        let foreign_key = table.foreign_keys.iter().find(|key| key.column == column)?;
        targets.push(foreign_key.references_table.as_str());
    }

    let (left, right) = (targets[0], targets[1]);
    let valid = left != right
        && left != table.name
        && right != table.name
        && listed.contains(left)
        && listed.contains(right);

    valid.then_some((left, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ForeignKey, Record};

    fn unit(name: &str) -> StorageUnit {
        StorageUnit {
            name: name.to_string(),
            attributes: vec![Record::new("Type", "BASE TABLE")],
        }
    }

    fn table(name: &str, primary_key: &[&str], foreign_keys: &[(&str, &str, &str)]) -> TableMetadata {
        TableMetadata {
            name: name.to_string(),
            columns: vec![Column::new("id", "integer")],
            primary_key: primary_key.iter().map(|column| column.to_string()).collect(),
            unique_columns: Vec::new(),
            foreign_keys: foreign_keys
                .iter()
                .map(|(column, references_table, references_column)| ForeignKey {
                    column: column.to_string(),
                    references_table: references_table.to_string(),
                    references_column: references_column.to_string(),
                })
                .collect(),
        }
    }

    fn relations(graph: &[GraphUnit], name: &str) -> Vec<(String, RelationshipType)> {
        graph
            .iter()
            .find(|unit| unit.unit.name == name)
            .map(|unit| {
                unit.relations
                    .iter()
                    .map(|relation| (relation.name.clone(), relation.relationship))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_many_to_one_and_inverse() {
        let units = [unit("users"), unit("orders")];
        let metadata = [
            table("users", &["id"], &[]),
            table("orders", &["id"], &[("user_id", "users", "id")]),
        ];

        let graph = build_graph(&units, &metadata);

        assert_eq!(graph.len(), 2);
        assert_eq!(graph[0].unit.name, "users");
        assert_eq!(
            relations(&graph, "orders"),
            vec![("users".to_string(), RelationshipType::ManyToOne)]
        );
        assert_eq!(
            relations(&graph, "users"),
            vec![("orders".to_string(), RelationshipType::OneToMany)]
        );
    }

    #[test]
    fn test_one_to_one_on_unique_column() {
        let units = [unit("users"), unit("profiles")];
        let mut profiles = table("profiles", &["id"], &[("user_id", "users", "id")]);
        profiles.unique_columns.push("user_id".to_string());

        let graph = build_graph(&units, &[table("users", &["id"], &[]), profiles]);

        assert_eq!(
            relations(&graph, "profiles"),
            vec![("users".to_string(), RelationshipType::OneToOne)]
        );
        assert_eq!(
            relations(&graph, "users"),
            vec![("profiles".to_string(), RelationshipType::OneToOne)]
        );
    }

    #[test]
    fn test_junction_table_is_many_to_many() {
        let units = [unit("students"), unit("courses"), unit("enrollments")];
        let metadata = [
            table("students", &["id"], &[]),
            table("courses", &["id"], &[]),
            table(
                "enrollments",
                &["student_id", "course_id"],
                &[("student_id", "students", "id"), ("course_id", "courses", "id")],
            ),
        ];

        let graph = build_graph(&units, &metadata);

        assert!(relations(&graph, "students").contains(&("courses".to_string(), RelationshipType::ManyToMany)));
        assert!(relations(&graph, "courses").contains(&("students".to_string(), RelationshipType::ManyToMany)));
        assert!(relations(&graph, "enrollments").contains(&("students".to_string(), RelationshipType::ManyToOne)));
    }

    #[test]
    fn test_relations_only_reference_listed_units() {
        let units = [unit("orders")];
        let metadata = [table("orders", &["id"], &[("user_id", "users", "id")])];

        let graph = build_graph(&units, &metadata);

        assert_eq!(graph.len(), 1);
        assert!(graph[0].relations.is_empty());
    }

    #[test]
    fn test_self_reference_only_from_self_foreign_key() {
        let units = [unit("employees"), unit("teams")];
        let metadata = [
            table("employees", &["id"], &[("manager_id", "employees", "id"), ("team_id", "teams", "id")]),
            table("teams", &["id"], &[]),
        ];

        let graph = build_graph(&units, &metadata);

        let employees = relations(&graph, "employees");
        assert!(employees.contains(&("employees".to_string(), RelationshipType::ManyToOne)));
        assert!(!relations(&graph, "teams").contains(&("teams".to_string(), RelationshipType::ManyToOne)));
        // a self reference disqualifies the junction shape
        assert!(!relations(&graph, "teams").iter().any(|(_, kind)| *kind == RelationshipType::ManyToMany));
    }

    #[test]
    fn test_duplicate_foreign_keys_collapse() {
        let units = [unit("users"), unit("orders")];
        let metadata = [
            table("users", &["id"], &[]),
            table("orders", &["id"], &[("user_id", "users", "id"), ("user_id", "users", "id")]),
        ];

        let graph = build_graph(&units, &metadata);
        assert_eq!(relations(&graph, "orders").len(), 1);
    }

    #[tokio::test]
    async fn test_collect_metadata_keeps_listing_order() {
        let units = [unit("a"), unit("b")];
        let metadata = collect_metadata(&units, |name| async move {
            Ok(TableMetadata {
                name,
                ..Default::default()
            })
        })
        .await
        .unwrap();

        assert_eq!(metadata[0].name, "a");
        assert_eq!(metadata[1].name, "b");
    }
}
