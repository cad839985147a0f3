use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Configured type-compatibility table. Entity types are open strings;
/// this table maps them onto compatibility groups. Two candidates merge
/// only when their groups agree — "Person" never merges with
/// "Organization" no matter how similar the names are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeCompatibility {
    /// Lowercased type tag -> group label.
    aliases: HashMap<String, String>,
}

impl TypeCompatibility {
    pub fn empty() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    pub fn with_alias(mut self, type_tag: &str, group: &str) -> Self {
        self.aliases
            .insert(type_tag.to_lowercase(), group.to_lowercase());
        self
    }

    /// The compatibility group of a type tag: its configured alias, or
    /// the lowercased tag itself.
    pub fn group_of(&self, type_tag: &str) -> String {
        let key = type_tag.trim().to_lowercase();
        self.aliases.get(&key).cloned().unwrap_or(key)
    }

    /// Unknown (empty) types are compatible with everything; otherwise
    /// the groups must agree.
    pub fn compatible(&self, a: &str, b: &str) -> bool {
        let ga = self.group_of(a);
        let gb = self.group_of(b);
        ga.is_empty() || gb.is_empty() || ga == gb
    }
}

impl Default for TypeCompatibility {
    fn default() -> Self {
        Self::empty()
            .with_alias("company", "organization")
            .with_alias("corporation", "organization")
            .with_alias("org", "organization")
            .with_alias("people", "person")
            .with_alias("individual", "person")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_type_is_compatible() {
        let table = TypeCompatibility::default();
        assert!(table.compatible("Organization", "organization"));
    }

    #[test]
    fn aliased_types_share_a_group() {
        let table = TypeCompatibility::default();
        assert!(table.compatible("Company", "Organization"));
        assert_eq!(table.group_of("Corporation"), "organization");
    }

    #[test]
    fn person_never_matches_organization() {
        let table = TypeCompatibility::default();
        assert!(!table.compatible("Person", "Organization"));
    }

    #[test]
    fn unknown_type_is_compatible_with_anything() {
        let table = TypeCompatibility::default();
        assert!(table.compatible("", "Organization"));
        assert!(table.compatible("Person", ""));
    }

    #[test]
    fn custom_aliases_override() {
        let table = TypeCompatibility::empty().with_alias("fund", "organization");
        assert!(table.compatible("Fund", "organization"));
        assert!(!table.compatible("Fund", "person"));
    }
}
