//! Query Builder scopes - default scope application, bypass and named scopes

use super::builder::QueryBuilder;
use crate::conditions::{compile, CompileOptions, Predicate};
use crate::error::{ModelError, ModelResult};
use crate::model::Entity;
use crate::transaction::Passthrough;

/// Default scopes to skip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScopeBypass {
    #[default]
    None,
    All,
    Named(Vec<String>),
}

impl ScopeBypass {
    pub fn bypasses(&self, scope: &str) -> bool {
        match self {
            ScopeBypass::None => false,
            ScopeBypass::All => true,
            ScopeBypass::Named(names) => names.iter().any(|name| name == scope),
        }
    }

    pub fn with_name(self, name: &str) -> Self {
        self.with_names([name])
    }

    pub fn with_names<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self {
            ScopeBypass::All => ScopeBypass::All,
            ScopeBypass::None => ScopeBypass::Named(names.into_iter().map(Into::into).collect()),
            ScopeBypass::Named(mut existing) => {
                for name in names {
                    let name = name.into();
                    if !existing.contains(&name) {
                        existing.push(name);
                    }
                }
                ScopeBypass::Named(existing)
            }
        }
    }

    /// Scopes bypassed by either side
    pub fn union(&self, other: &ScopeBypass) -> ScopeBypass {
        match (self, other) {
            (ScopeBypass::All, _) | (_, ScopeBypass::All) => ScopeBypass::All,
            (ScopeBypass::None, other) | (other, ScopeBypass::None) => other.clone(),
            (ScopeBypass::Named(names), other) => other.clone().with_names(names.iter().cloned()),
        }
    }
}

/// Predicates of every default scope of `entity` not bypassed, qualified with `alias`
pub(crate) fn default_scope_predicates(
    entity: &Entity,
    alias: &str,
    bypass: &ScopeBypass,
    passthrough: &Passthrough,
) -> ModelResult<Vec<Predicate>> {
    let options = CompileOptions::default().with_passthrough(passthrough);
    let mut predicates = Vec::new();
    for scope in entity.default_scopes() {
        if bypass.bypasses(&scope.name) {
            continue;
        }
        for predicate in compile(&scope.clause, &options)? {
            predicates.push(predicate.with_default_alias(alias));
        }
    }
    Ok(predicates)
}

impl QueryBuilder {
    /// Skip one default scope on the root entity
    pub fn remove_default_scope(mut self, name: &str) -> Self {
        self.bypass = self.bypass.with_name(name);
        self
    }

    /// Skip every default scope on the root entity
    pub fn remove_all_default_scopes(mut self) -> Self {
        self.bypass = ScopeBypass::All;
        self
    }

    /// Skip one default scope on the root and on every joined or loaded association
    pub fn remove_default_scope_including_associations(mut self, name: &str) -> Self {
        self.bypass = self.bypass.with_name(name);
        self.association_bypass = self.association_bypass.with_name(name);
        self
    }

    /// Skip every default scope on the root and on every joined or loaded association
    pub fn remove_all_default_scopes_including_associations(mut self) -> Self {
        self.bypass = ScopeBypass::All;
        self.association_bypass = ScopeBypass::All;
        self
    }

    /// Apply a named scope registered on the entity
    pub fn scope(self, name: &str) -> ModelResult<Self> {
        let scope = self
            .registry
            .entity(&self.entity)?
            .named_scope(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownScope {
                entity: self.entity.clone(),
                scope: name.to_string(),
            })?;
        Ok(scope(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_union() {
        let named = ScopeBypass::None.with_name("soft_delete");
        assert!(named.bypasses("soft_delete"));
        assert!(!named.bypasses("published"));

        let both = named.union(&ScopeBypass::Named(vec!["published".to_string()]));
        assert!(both.bypasses("soft_delete"));
        assert!(both.bypasses("published"));

        assert_eq!(both.union(&ScopeBypass::All), ScopeBypass::All);
        assert_eq!(ScopeBypass::None.union(&ScopeBypass::None), ScopeBypass::None);
        assert_eq!(ScopeBypass::All.with_name("x"), ScopeBypass::All);
    }
}
