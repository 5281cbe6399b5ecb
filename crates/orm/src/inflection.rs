//! Naming conventions used to infer default foreign keys and polymorphic columns

/// Simple singularization (English-centric)
pub fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        format!("{}y", stem)
    } else if name.ends_with("sses")
        || name.ends_with("ches")
        || name.ends_with("shes")
        || name.ends_with("xes")
        || name.ends_with("zes")
    {
        name[..name.len() - 2].to_string()
    } else if name.ends_with('s') && !name.ends_with("ss") && name.len() > 1 {
        name[..name.len() - 1].to_string()
    } else {
        name.to_string()
    }
}

/// Foreign key named after a table: `users` -> `user_id`
pub fn foreign_key_for_table(table: &str) -> String {
    // schema-qualified tables keep only the relation name
    let relation = table.rsplit('.').next().unwrap_or(table);
    format!("{}_id", singularize(relation))
}

/// Polymorphic column pair for an association name: `commentable` ->
/// (`commentable_id`, `commentable_type`)
pub fn polymorphic_columns(name: &str) -> (String, String) {
    (format!("{}_id", name), format!("{}_type", name))
}
