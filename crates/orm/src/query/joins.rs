//! Query Builder JOIN operations
//!
//! Joins are requested by relationship path (`"posts.comments as c"`) and
//! resolved against the registry when the statement is compiled. Through
//! relationships expand into one join per direct edge; intermediate edges
//! are aliased `<alias>_via_<relationship>` and never selected.

use std::collections::HashMap;

use super::builder::QueryBuilder;
use super::scopes::default_scope_predicates;
use super::types::*;
use crate::conditions::{compile, ColumnRef, CompileOptions, Operand, Operator, Predicate, WhereClause};
use crate::error::{ModelError, ModelResult};
use crate::relationships::{Hop, Relationship, SelfCondition};

/// Alias a table is selected under: its relation name without schema
pub(crate) fn table_alias(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

/// Split `"posts.comments as c"` into the relationship path and alias
fn parse_join_path(requested: &str) -> (Vec<String>, Option<String>) {
    let requested = requested.trim();
    let lowered = requested.to_ascii_lowercase();
    let (path, alias) = match lowered.find(" as ") {
        Some(index) => (&requested[..index], Some(requested[index + 4..].trim().to_string())),
        None => (requested, None),
    };
    let path = path
        .split('.')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    (path, alias.filter(|alias| !alias.is_empty()))
}

impl QueryBuilder {
    /// INNER JOIN along a relationship path
    pub fn inner_join(self, path: &str) -> Self {
        self.add_join(path, JoinType::Inner, None)
    }

    /// INNER JOIN along a relationship path with conditions on the last alias
    pub fn inner_join_where(self, path: &str, clause: WhereClause) -> Self {
        self.add_join(path, JoinType::Inner, Some(clause))
    }

    /// LEFT JOIN along a relationship path
    pub fn left_join(self, path: &str) -> Self {
        self.add_join(path, JoinType::Left, None)
    }

    /// LEFT JOIN along a relationship path with conditions on the last alias
    pub fn left_join_where(self, path: &str, clause: WhereClause) -> Self {
        self.add_join(path, JoinType::Left, Some(clause))
    }

    fn add_join(mut self, requested: &str, join_type: JoinType, clause: Option<WhereClause>) -> Self {
        let (path, alias) = parse_join_path(requested);
        let mut parent: Option<String> = None;

        for (index, segment) in path.iter().enumerate() {
            let last = index + 1 == path.len();
            let node_alias = match (&alias, last) {
                (Some(alias), true) => alias.clone(),
                _ => segment.clone(),
            };

            let existing = self.joins.iter().position(|node| {
                node.alias == node_alias && node.parent == parent && &node.relationship == segment
            });
            let position = match existing {
                Some(position) => position,
                None => {
                    self.joins.push(JoinNode {
                        parent: parent.clone(),
                        relationship: segment.clone(),
                        alias: node_alias.clone(),
                        join_type,
                        conditions: Vec::new(),
                    });
                    self.joins.len() - 1
                }
            };

            if last {
                if let Some(clause) = &clause {
                    self.joins[position].conditions.push(clause.clone());
                }
            }
            parent = Some(node_alias);
        }
        self
    }

    /// Resolve the join tree into renderable joins, and map every alias
    /// (the root's included) to its entity
    pub(crate) fn resolve_joins(&self) -> ModelResult<(Vec<ResolvedJoin>, HashMap<String, String>)> {
        let root = self.root_entity()?;
        let root_alias = table_alias(root.table()).to_string();

        let mut aliases: HashMap<String, String> = HashMap::new();
        aliases.insert(root_alias.clone(), self.entity.clone());

        let mut resolved = Vec::new();
        for node in &self.joins {
            if aliases.contains_key(&node.alias) {
                return Err(ModelError::Configuration(format!(
                    "Join alias '{}' is used more than once",
                    node.alias
                )));
            }
            let parent_alias = node.parent.clone().unwrap_or_else(|| root_alias.clone());
            let owner = aliases
                .get(&parent_alias)
                .cloned()
                .ok_or_else(|| ModelError::Query(format!("Unknown join alias '{}'", parent_alias)))?;

            let path = self.registry.resolve_path(&owner, &node.relationship)?;
            let mut chain = vec![parent_alias];
            for (index, hop) in path.hops.iter().enumerate() {
                let alias = if index + 1 == path.hops.len() {
                    node.alias.clone()
                } else {
                    let alias = format!("{}_via_{}", node.alias, hop.name());
                    if chain.contains(&alias) || aliases.contains_key(&alias) {
                        format!("{}_{}", alias, index)
                    } else {
                        alias
                    }
                };
                chain.push(alias);
            }

            for (index, hop) in path.hops.iter().enumerate() {
                let to = &chain[index + 1];
                let target = self.registry.entity(&hop.target)?;

                let mut on = self.edge_predicates(hop, &chain, index)?;
                let bypass = hop
                    .terminating
                    .iter()
                    .fold(hop.relationship.scope_bypass().clone(), |bypass, t| {
                        bypass.union(t.relationship.scope_bypass())
                    })
                    .union(&self.association_bypass);
                on.extend(default_scope_predicates(
                    target,
                    to,
                    &bypass,
                    &self.context.passthrough,
                )?);

                if index + 1 == path.hops.len() {
                    let options = CompileOptions::default().with_passthrough(&self.context.passthrough);
                    for clause in &node.conditions {
                        for predicate in compile(clause, &options)? {
                            on.push(predicate.with_default_alias(to));
                        }
                    }
                }

                aliases.insert(to.clone(), hop.target.clone());
                resolved.push(ResolvedJoin {
                    join_type: node.join_type,
                    table: target.table().to_string(),
                    alias: to.clone(),
                    entity: hop.target.clone(),
                    on,
                });
            }
        }

        Ok((resolved, aliases))
    }

    /// ON predicates of one direct edge: key equality, polymorphic type,
    /// relationship conditions and conditions of through relationships ending here
    fn edge_predicates(&self, hop: &Hop, chain: &[String], index: usize) -> ModelResult<Vec<Predicate>> {
        let registry = &self.registry;
        let from = chain[index].as_str();
        let to = chain[index + 1].as_str();
        let options = CompileOptions::default().with_passthrough(&self.context.passthrough);
        let mut on = Vec::new();

        match hop.relationship.as_ref() {
            Relationship::BelongsTo(belongs_to) => {
                let foreign_key = belongs_to.foreign_key(registry)?;
                let key = belongs_to.target_key(registry, &hop.target)?;
                on.push(Predicate::columns_equal(
                    ColumnRef::qualified(to, &key),
                    ColumnRef::qualified(from, foreign_key),
                ));
            }
            Relationship::HasOne(has) | Relationship::HasMany(has) => {
                let foreign_key = has.foreign_key(registry)?;
                let owner_key = has.owner_key(registry)?;
                on.push(Predicate::columns_equal(
                    ColumnRef::qualified(to, foreign_key),
                    ColumnRef::qualified(from, &owner_key),
                ));
                if let Some(type_column) = has.type_column() {
                    on.push(Predicate::compare(
                        ColumnRef::qualified(to, &type_column),
                        Operator::Equal,
                        Operand::Value(registry.polymorphic_type_name(&hop.owner)?.into()),
                    ));
                }
                on.extend(has_conditions(has.conditions(), has.negated_conditions(), to, &options)?);
                on.extend(self_predicates(has.self_conditions(), to, from));
            }
        }

        for terminating in &hop.terminating {
            if let Some(has) = terminating.relationship.as_has() {
                on.extend(has_conditions(has.conditions(), has.negated_conditions(), to, &options)?);
                on.extend(self_predicates(has.self_conditions(), to, &chain[terminating.start]));
            }
        }

        Ok(on)
    }
}

fn has_conditions(
    conditions: &WhereClause,
    negated: &WhereClause,
    alias: &str,
    options: &CompileOptions<'_>,
) -> ModelResult<Vec<Predicate>> {
    let mut predicates = Vec::new();
    for predicate in compile(conditions, options)? {
        predicates.push(predicate.with_default_alias(alias));
    }
    for predicate in compile(negated, &options.negated())? {
        predicates.push(predicate.with_default_alias(alias));
    }
    Ok(predicates)
}

fn self_predicates(conditions: &[SelfCondition], target_alias: &str, owner_alias: &str) -> Vec<Predicate> {
    conditions
        .iter()
        .map(|condition| Predicate::Columns {
            left: ColumnRef::qualified(target_alias, &condition.target_column),
            operator: if condition.negated {
                Operator::NotEqual
            } else {
                Operator::Equal
            },
            right: ColumnRef::qualified(owner_alias, &condition.owner_column),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_path() {
        assert_eq!(parse_join_path("posts"), (vec!["posts".to_string()], None));
        assert_eq!(
            parse_join_path("posts.comments AS c"),
            (
                vec!["posts".to_string(), "comments".to_string()],
                Some("c".to_string())
            )
        );
        assert_eq!(table_alias("public.users"), "users");
    }
}
