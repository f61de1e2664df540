//! Channel mapping
//!
//! Binds contiguous DMX channel ranges to the typed inputs an effect declares.
//! Mappings are validated against the effect registry once, when the mapper is
//! built. Decoding afterwards is total: missing universes or channels read as
//! zero and unmapped inputs take their declared default.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::effects::{EffectRegistry, InputSpec};
use crate::error::ConfigError;
use crate::frame::Rgbw;
use crate::universe::{PortAddress, UniverseStore, UNIVERSE_SIZE};

/// How a channel range turns into an input value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeRule {
    /// One channel, 0..=255 mapped linearly onto 0.0..=1.0
    Fraction,
    /// One channel, raw
    Byte,
    /// Three channels
    Rgb,
    /// Four channels, unscaled
    Rgbw,
}

impl DecodeRule {
    /// Number of channels consumed
    pub fn width(self) -> usize {
        match self {
            DecodeRule::Fraction | DecodeRule::Byte => 1,
            DecodeRule::Rgb => 3,
            DecodeRule::Rgbw => 4,
        }
    }

    /// Decode from up to `width()` bytes; missing bytes read as zero
    pub fn decode(self, bytes: &[u8]) -> InputValue {
        let at = |i: usize| bytes.get(i).copied().unwrap_or(0);
        match self {
            DecodeRule::Fraction => InputValue::Fraction(at(0) as f32 / 255.0),
            DecodeRule::Byte => InputValue::Byte(at(0)),
            DecodeRule::Rgb => InputValue::Rgb([at(0), at(1), at(2)]),
            DecodeRule::Rgbw => InputValue::Rgbw(Rgbw::new(at(0), at(1), at(2), at(3))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DecodeRule::Fraction => "fraction",
            DecodeRule::Byte => "byte",
            DecodeRule::Rgb => "rgb",
            DecodeRule::Rgbw => "rgbw",
        }
    }
}

/// A decoded input value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InputValue {
    Fraction(f32),
    Byte(u8),
    Rgb([u8; 3]),
    Rgbw(Rgbw),
}

impl InputValue {
    pub fn rule(&self) -> DecodeRule {
        match self {
            InputValue::Fraction(_) => DecodeRule::Fraction,
            InputValue::Byte(_) => DecodeRule::Byte,
            InputValue::Rgb(_) => DecodeRule::Rgb,
            InputValue::Rgbw(_) => DecodeRule::Rgbw,
        }
    }

    /// Scalar view, 0.0..=1.0
    pub fn as_fraction(&self) -> f32 {
        match self {
            InputValue::Fraction(v) => v.clamp(0.0, 1.0),
            InputValue::Byte(v) => *v as f32 / 255.0,
            InputValue::Rgb(c) => c[0] as f32 / 255.0,
            InputValue::Rgbw(c) => c.r as f32 / 255.0,
        }
    }

    /// Color view; scalars become white levels
    pub fn as_rgbw(&self) -> Rgbw {
        match self {
            InputValue::Rgbw(c) => *c,
            InputValue::Rgb(c) => Rgbw::new(c[0], c[1], c[2], 0),
            InputValue::Byte(v) => Rgbw::new(0, 0, 0, *v),
            InputValue::Fraction(v) => Rgbw::new(0, 0, 0, (v.clamp(0.0, 1.0) * 255.0).round() as u8),
        }
    }
}

/// Binding of one effect input to a channel range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub effect: String,
    pub input: String,
    /// Flat 15-bit port address
    pub universe: u16,
    /// 1-based DMX start address
    pub start: usize,
    pub rule: DecodeRule,
}

impl ChannelMapping {
    /// 0-based channel range
    pub fn range(&self) -> std::ops::Range<usize> {
        let first = self.start.saturating_sub(1);
        first..first + self.rule.width()
    }

    pub fn port_address(&self) -> PortAddress {
        PortAddress::from_u16(self.universe)
    }

    /// Decode this mapping from a universe snapshot
    pub fn decode(&self, store: &UniverseStore) -> InputValue {
        let address = self.port_address();
        let bytes: Vec<u8> = self.range().map(|ch| store.channel(address, ch)).collect();
        self.rule.decode(&bytes)
    }
}

/// Sequential patch starting at a DMX address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoPatch {
    pub universe: u16,
    /// 1-based DMX start address
    pub start: usize,
}

impl Default for AutoPatch {
    fn default() -> Self {
        Self { universe: 0, start: 1 }
    }
}

/// Decoded inputs handed to an effect
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EffectInputs {
    values: BTreeMap<String, InputValue>,
}

impl EffectInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<InputValue> {
        self.values.get(name).copied()
    }

    pub fn set(&mut self, name: impl Into<String>, value: InputValue) {
        self.values.insert(name.into(), value);
    }

    /// Scalar input, 0.0 if missing
    pub fn fraction(&self, name: &str) -> f32 {
        self.get(name).map(|v| v.as_fraction()).unwrap_or(0.0)
    }

    /// Raw byte input, 0 if missing
    pub fn byte(&self, name: &str) -> u8 {
        match self.get(name) {
            Some(InputValue::Byte(v)) => v,
            Some(other) => (other.as_fraction() * 255.0).round() as u8,
            None => 0,
        }
    }

    /// Color input, black if missing
    pub fn color(&self, name: &str) -> Rgbw {
        self.get(name).map(|v| v.as_rgbw()).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InputValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Validated mappings for every registered effect
#[derive(Debug, Clone, Default)]
pub struct ChannelMapper {
    /// Mappings per effect, keyed by input name
    mappings: HashMap<String, BTreeMap<String, ChannelMapping>>,
    /// Declared schema per effect, in declaration order
    schemas: HashMap<String, Vec<InputSpec>>,
}

impl ChannelMapper {
    /// Validate `mappings` against the registry
    ///
    /// Effects without explicit mappings are patched sequentially from
    /// `auto_patch` when given; otherwise their inputs stay at their defaults.
    pub fn new(
        registry: &EffectRegistry,
        mappings: &[ChannelMapping],
        auto_patch: Option<AutoPatch>,
    ) -> Result<Self, ConfigError> {
        let schemas: HashMap<String, Vec<InputSpec>> = registry
            .effects()
            .map(|def| (def.effect_type().to_string(), def.inputs()))
            .collect();

        let mut by_effect: HashMap<String, BTreeMap<String, ChannelMapping>> = HashMap::new();
        for mapping in mappings {
            let schema = schemas
                .get(&mapping.effect)
                .ok_or_else(|| ConfigError::UnknownEffect(mapping.effect.clone()))?;
            validate_mapping(mapping, schema)?;
            by_effect
                .entry(mapping.effect.clone())
                .or_default()
                .insert(mapping.input.clone(), mapping.clone());
        }

        if let Some(patch) = auto_patch {
            for (effect, schema) in &schemas {
                if by_effect.contains_key(effect) {
                    continue;
                }
                let patched = sequential(effect, schema, patch);
                for mapping in &patched {
                    validate_mapping(mapping, schema)?;
                }
                by_effect.insert(
                    effect.clone(),
                    patched.into_iter().map(|m| (m.input.clone(), m)).collect(),
                );
            }
        }

        for (effect, inputs) in &by_effect {
            check_overlaps(effect, inputs.values())?;
        }

        tracing::debug!(
            effects = by_effect.len(),
            mappings = by_effect.values().map(|m| m.len()).sum::<usize>(),
            "Channel mappings validated"
        );

        Ok(Self {
            mappings: by_effect,
            schemas,
        })
    }

    /// Decode every declared input of `effect`
    pub fn decode(&self, effect: &str, store: &UniverseStore) -> EffectInputs {
        let mut inputs = EffectInputs::new();
        let Some(schema) = self.schemas.get(effect) else {
            return inputs;
        };
        let mapped = self.mappings.get(effect);
        for spec in schema {
            let value = mapped
                .and_then(|m| m.get(spec.name))
                .map(|mapping| mapping.decode(store))
                .unwrap_or(spec.default);
            inputs.set(spec.name, value);
        }
        inputs
    }

    /// Mappings of one effect
    pub fn mappings_for(&self, effect: &str) -> Vec<ChannelMapping> {
        self.mappings
            .get(effect)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Declared schema of one effect
    pub fn schema(&self, effect: &str) -> Option<&[InputSpec]> {
        self.schemas.get(effect).map(|s| s.as_slice())
    }

    /// Universes any mapping reads from
    pub fn universes(&self) -> Vec<u16> {
        let mut universes: Vec<u16> = self
            .mappings
            .values()
            .flat_map(|m| m.values().map(|mapping| mapping.universe))
            .collect();
        universes.sort_unstable();
        universes.dedup();
        universes
    }
}

/// Patch inputs back to back in declaration order
pub fn sequential(effect: &str, schema: &[InputSpec], patch: AutoPatch) -> Vec<ChannelMapping> {
    let mut start = patch.start;
    schema
        .iter()
        .map(|spec| {
            let mapping = ChannelMapping {
                effect: effect.to_string(),
                input: spec.name.to_string(),
                universe: patch.universe,
                start,
                rule: spec.rule,
            };
            start += spec.rule.width();
            mapping
        })
        .collect()
}

fn validate_mapping(mapping: &ChannelMapping, schema: &[InputSpec]) -> Result<(), ConfigError> {
    let spec = schema
        .iter()
        .find(|s| s.name == mapping.input)
        .ok_or_else(|| ConfigError::UnknownInput {
            effect: mapping.effect.clone(),
            input: mapping.input.clone(),
        })?;

    if spec.rule != mapping.rule {
        return Err(ConfigError::RuleMismatch {
            effect: mapping.effect.clone(),
            input: mapping.input.clone(),
            expected: spec.rule.name().to_string(),
            found: mapping.rule.name().to_string(),
        });
    }

    let range = mapping.range();
    if mapping.start == 0 || range.end > UNIVERSE_SIZE {
        return Err(ConfigError::RangeOutOfBounds {
            effect: mapping.effect.clone(),
            input: mapping.input.clone(),
            start: mapping.start,
            end: mapping.start + mapping.rule.width().saturating_sub(1),
        });
    }
    Ok(())
}

fn check_overlaps<'a>(
    effect: &str,
    mappings: impl Iterator<Item = &'a ChannelMapping>,
) -> Result<(), ConfigError> {
    let mut sorted: Vec<&ChannelMapping> = mappings.collect();
    sorted.sort_by_key(|m| (m.universe, m.start));
    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.universe == b.universe && a.range().end > b.range().start {
            return Err(ConfigError::OverlappingRanges {
                effect: effect.to_string(),
                first: a.input.clone(),
                second: b.input.clone(),
                universe: a.universe,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::register_builtin_effects;
    use crate::universe::UniverseUpdate;

    fn registry() -> EffectRegistry {
        let mut registry = EffectRegistry::new();
        register_builtin_effects(&mut registry);
        registry
    }

    fn mapping(input: &str, start: usize, rule: DecodeRule) -> ChannelMapping {
        ChannelMapping {
            effect: "single_color".into(),
            input: input.into(),
            universe: 0,
            start,
            rule,
        }
    }

    fn store_with(universe: u16, data: Vec<u8>) -> UniverseStore {
        let mut store = UniverseStore::new();
        store.apply(
            UniverseUpdate {
                address: PortAddress::from_u16(universe),
                sequence: 0,
                data,
            },
            0,
        );
        store
    }

    #[test]
    fn test_decode_rules() {
        assert_eq!(DecodeRule::Fraction.decode(&[255]), InputValue::Fraction(1.0));
        assert_eq!(DecodeRule::Byte.decode(&[7]), InputValue::Byte(7));
        assert_eq!(DecodeRule::Rgb.decode(&[1, 2]), InputValue::Rgb([1, 2, 0]));
        assert_eq!(
            DecodeRule::Rgbw.decode(&[1, 2, 3, 4]),
            InputValue::Rgbw(Rgbw::new(1, 2, 3, 4))
        );
    }

    #[test]
    fn test_mapper_decodes_from_store() {
        let mapper = ChannelMapper::new(
            &registry(),
            &[
                mapping("master", 1, DecodeRule::Fraction),
                mapping("color", 2, DecodeRule::Rgbw),
            ],
            None,
        )
        .unwrap();
        let store = store_with(0, vec![255, 10, 20, 30, 40]);
        let inputs = mapper.decode("single_color", &store);
        assert_eq!(inputs.fraction("master"), 1.0);
        assert_eq!(inputs.color("color"), Rgbw::new(10, 20, 30, 40));
    }

    #[test]
    fn test_all_zero_universe_decodes_to_zero() {
        let mapper = ChannelMapper::new(&registry(), &[], Some(AutoPatch::default())).unwrap();
        let store = store_with(0, vec![0; 512]);
        for def in registry().effects() {
            let inputs = mapper.decode(def.effect_type(), &store);
            assert_eq!(inputs.len(), def.inputs().len());
            for (_, value) in inputs.iter() {
                assert_eq!(value.as_fraction(), 0.0);
            }
        }
    }

    #[test]
    fn test_missing_universe_decodes_to_zero() {
        let mapper = ChannelMapper::new(&registry(), &[], Some(AutoPatch::default())).unwrap();
        let inputs = mapper.decode("single_color", &UniverseStore::new());
        assert_eq!(inputs.fraction("master"), 0.0);
        assert_eq!(inputs.color("color"), Rgbw::BLACK);
    }

    #[test]
    fn test_unmapped_inputs_use_defaults() {
        let mapper = ChannelMapper::new(&registry(), &[], None).unwrap();
        let inputs = mapper.decode("single_color", &UniverseStore::new());
        let schema = mapper.schema("single_color").unwrap();
        for spec in schema {
            assert_eq!(inputs.get(spec.name), Some(spec.default));
        }
    }

    #[test]
    fn test_range_beyond_512_rejected() {
        let err = ChannelMapper::new(&registry(), &[mapping("color", 510, DecodeRule::Rgbw)], None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::RangeOutOfBounds { start: 510, .. }));

        let err = ChannelMapper::new(&registry(), &[mapping("master", 0, DecodeRule::Fraction)], None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::RangeOutOfBounds { .. }));

        assert!(ChannelMapper::new(&registry(), &[mapping("color", 509, DecodeRule::Rgbw)], None).is_ok());
    }

    #[test]
    fn test_overlap_within_effect_rejected() {
        let err = ChannelMapper::new(
            &registry(),
            &[
                mapping("master", 4, DecodeRule::Fraction),
                mapping("color", 1, DecodeRule::Rgbw),
            ],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::OverlappingRanges { .. }));
    }

    #[test]
    fn test_overlap_across_effects_allowed() {
        let mut gradient = mapping("color", 2, DecodeRule::Rgbw);
        gradient.effect = "gradient".into();
        ChannelMapper::new(
            &registry(),
            &[mapping("color", 2, DecodeRule::Rgbw), gradient],
            None,
        )
        .unwrap();
    }

    #[test]
    fn test_unknown_input_and_rule_mismatch() {
        let err = ChannelMapper::new(&registry(), &[mapping("speed", 1, DecodeRule::Fraction)], None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownInput { .. }));

        let err = ChannelMapper::new(&registry(), &[mapping("color", 1, DecodeRule::Rgb)], None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::RuleMismatch { .. }));

        let mut unknown = mapping("master", 1, DecodeRule::Fraction);
        unknown.effect = "nope".into();
        let err = ChannelMapper::new(&registry(), &[unknown], None).unwrap_err();
        assert_eq!(err, ConfigError::UnknownEffect("nope".into()));
    }

    #[test]
    fn test_sequential_patch() {
        let registry = registry();
        let def = registry.get("single_color").unwrap();
        let patched = sequential("single_color", &def.inputs(), AutoPatch { universe: 2, start: 10 });
        assert_eq!(patched[0].input, "master");
        assert_eq!(patched[0].range(), 9..10);
        assert_eq!(patched[1].input, "color");
        assert_eq!(patched[1].range(), 10..14);
        assert!(patched.iter().all(|m| m.universe == 2));
    }

    #[test]
    fn test_auto_patch_out_of_range_rejected() {
        let err = ChannelMapper::new(&registry(), &[], Some(AutoPatch { universe: 0, start: 511 }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::RangeOutOfBounds { .. }));
    }
}
