//! Effect registry for managing available effects
//!
//! The registry holds every registered effect definition and creates
//! instances by name. Registration is a static table filled at startup.

use std::collections::HashMap;
use std::sync::Arc;

use super::traits::{Effect, EffectDefinition};

/// Effect listed first in display order
pub const DEFAULT_EFFECT: &str = "single_color";

/// Registry of available effects
pub struct EffectRegistry {
    /// Effect definitions by type identifier
    effects: HashMap<String, Arc<dyn EffectDefinition>>,
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            effects: HashMap::new(),
        }
    }

    /// Register an effect definition, replacing one with the same type
    pub fn register(&mut self, definition: impl EffectDefinition + 'static) {
        let effect_type = definition.effect_type().to_string();
        if self.effects.contains_key(&effect_type) {
            tracing::warn!(effect = %effect_type, "Replacing registered effect");
        }
        self.effects.insert(effect_type, Arc::new(definition));
    }

    /// Get an effect definition by type
    pub fn get(&self, effect_type: &str) -> Option<Arc<dyn EffectDefinition>> {
        self.effects.get(effect_type).cloned()
    }

    /// Check if an effect type is registered
    pub fn contains(&self, effect_type: &str) -> bool {
        self.effects.contains_key(effect_type)
    }

    /// Get all effect definitions
    pub fn effects(&self) -> impl Iterator<Item = &Arc<dyn EffectDefinition>> {
        self.effects.values()
    }

    /// Effect types in display order: the default effect first, then by name
    pub fn ordered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.effects.keys().cloned().collect();
        types.sort_by(|a, b| {
            (a != DEFAULT_EFFECT)
                .cmp(&(b != DEFAULT_EFFECT))
                .then_with(|| a.cmp(b))
        });
        types
    }

    /// Get the number of registered effects
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Create a fresh instance of an effect
    pub fn create(&self, effect_type: &str) -> Option<Box<dyn Effect>> {
        self.get(effect_type).map(|def| def.create())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::traits::{EffectContext, InputSpec};
    use crate::error::EffectError;
    use crate::frame::PixelFrame;
    use crate::mapping::EffectInputs;

    // Mock effect for testing
    struct MockEffect {
        effect_type: &'static str,
        display_name: &'static str,
        category: &'static str,
    }

    struct MockInstance;

    impl Effect for MockInstance {
        fn compute(
            &mut self,
            ctx: &EffectContext,
            _inputs: &EffectInputs,
            _previous: &PixelFrame,
        ) -> Result<PixelFrame, EffectError> {
            Ok(ctx.blank_frame())
        }
    }

    impl EffectDefinition for MockEffect {
        fn effect_type(&self) -> &'static str {
            self.effect_type
        }

        fn display_name(&self) -> &'static str {
            self.display_name
        }

        fn category(&self) -> &'static str {
            self.category
        }

        fn inputs(&self) -> Vec<InputSpec> {
            vec![]
        }

        fn create(&self) -> Box<dyn Effect> {
            Box::new(MockInstance)
        }
    }

    fn mock(effect_type: &'static str, display_name: &'static str, category: &'static str) -> MockEffect {
        MockEffect {
            effect_type,
            display_name,
            category,
        }
    }

    #[test]
    fn test_registry_new() {
        let registry = EffectRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_registry_register() {
        let mut registry = EffectRegistry::new();
        registry.register(mock("test_effect", "Test Effect", "Test"));

        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("test_effect"));
        assert!(registry.create("test_effect").is_some());
        assert!(registry.create("missing").is_none());
    }

    #[test]
    fn test_registry_reregister_keeps_single_entry() {
        let mut registry = EffectRegistry::new();
        registry.register(mock("strobe", "Strobe", "Pattern"));
        registry.register(mock("strobe", "Strobe 2", "Pattern"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("strobe").map(|def| def.display_name()), Some("Strobe 2"));
    }

    #[test]
    fn test_ordered_types_default_first() {
        let mut registry = EffectRegistry::new();
        registry.register(mock("gradient", "Gradient", "Color"));
        registry.register(mock("afterglow", "Afterglow", "Pattern"));
        registry.register(mock("single_color", "Single Color", "Color"));

        assert_eq!(registry.ordered_types(), vec!["single_color", "afterglow", "gradient"]);
    }
}
