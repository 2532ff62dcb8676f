use serde::{Deserialize, Serialize};

use crate::name::SchemaObjectName;

/// Kind of schema object managed by the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    View,
    MaterializedView,
    Function,
}

/// An introspected or to-be-created view or function.
///
/// Equality is structural: kind, canonical name and body text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaObject {
    View {
        name: SchemaObjectName,
        definition: String,
    },
    MaterializedView {
        name: SchemaObjectName,
        definition: String,
    },
    Function {
        name: SchemaObjectName,
        definition: String,
    },
}

impl SchemaObject {
    pub fn view(name: SchemaObjectName, definition: impl Into<String>, materialized: bool) -> Self {
        let definition = definition.into();
        if materialized {
            SchemaObject::MaterializedView { name, definition }
        } else {
            SchemaObject::View { name, definition }
        }
    }

    pub fn function(name: SchemaObjectName, definition: impl Into<String>) -> Self {
        SchemaObject::Function {
            name,
            definition: definition.into(),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            SchemaObject::View { .. } => ObjectKind::View,
            SchemaObject::MaterializedView { .. } => ObjectKind::MaterializedView,
            SchemaObject::Function { .. } => ObjectKind::Function,
        }
    }

    pub fn name(&self) -> &SchemaObjectName {
        match self {
            SchemaObject::View { name, .. }
            | SchemaObject::MaterializedView { name, .. }
            | SchemaObject::Function { name, .. } => name,
        }
    }

    pub fn definition(&self) -> &str {
        match self {
            SchemaObject::View { definition, .. }
            | SchemaObject::MaterializedView { definition, .. }
            | SchemaObject::Function { definition, .. } => definition,
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self, SchemaObject::MaterializedView { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> SchemaObjectName {
        SchemaObjectName::parse(s).unwrap()
    }

    #[test]
    fn test_view_constructor_picks_variant() {
        let plain = SchemaObject::view(name("greetings"), "SELECT 1;", false);
        let mat = SchemaObject::view(name("greetings"), "SELECT 1;", true);

        assert_eq!(plain.kind(), ObjectKind::View);
        assert_eq!(mat.kind(), ObjectKind::MaterializedView);
        assert!(!plain.is_materialized());
        assert!(mat.is_materialized());
        assert_ne!(plain, mat);
    }

    #[test]
    fn test_structural_equality() {
        let a = SchemaObject::function(name("get_result"), "CREATE FUNCTION ...");
        let b = SchemaObject::function(name("public.get_result"), "CREATE FUNCTION ...");
        let c = SchemaObject::function(name("get_result"), "CREATE FUNCTION other");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_json_shape() {
        let view = SchemaObject::view(name("scenic.parents"), "SELECT 'Joe'::text AS name;", true);
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["kind"], "materialized_view");
        assert_eq!(json["name"], "scenic.parents");
        assert_eq!(json["definition"], "SELECT 'Joe'::text AS name;");

        let back: SchemaObject = serde_json::from_value(json).unwrap();
        assert_eq!(back, view);
    }
}
