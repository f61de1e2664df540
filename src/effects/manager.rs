//! Effect manager - owns the active effect and is the only caller into it
//!
//! Each tick the manager decodes the active effect's inputs from the universe
//! snapshot, layers manual overrides on top, runs the effect through its
//! runtime and passes the result through the transition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::registry::EffectRegistry;
use super::runtime::{EffectRuntime, FaultPolicy, RuntimeStatus, TickStatus};
use super::transition::{Transition, TransitionPolicy};
use crate::error::ConfigError;
use crate::frame::PixelFrame;
use crate::mapping::{ChannelMapper, EffectInputs, InputValue};
use crate::universe::{PortAddress, UniverseStore, UNIVERSE_SIZE};

/// DMX channel that picks the active effect from a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub universe: u16,
    /// 1-based DMX address
    pub channel: usize,
    /// Effects in selection order; the channel range is split evenly among them
    pub effects: Vec<String>,
}

/// Selects effects from a DMX channel, acting only when the value changes
#[derive(Debug, Clone)]
pub struct EffectSelector {
    config: SelectorConfig,
    last_value: Option<u8>,
}

impl EffectSelector {
    pub fn new(config: SelectorConfig, registry: &EffectRegistry) -> Result<Self, ConfigError> {
        if config.channel == 0 || config.channel > UNIVERSE_SIZE {
            return Err(ConfigError::InvalidSetting {
                key: "selector.channel".into(),
                reason: format!("{} is outside 1..=512", config.channel),
            });
        }
        if config.effects.is_empty() {
            return Err(ConfigError::InvalidSetting {
                key: "selector.effects".into(),
                reason: "list is empty".into(),
            });
        }
        if let Some(unknown) = config.effects.iter().find(|e| !registry.contains(e)) {
            return Err(ConfigError::UnknownEffect(unknown.clone()));
        }
        Ok(Self {
            config,
            last_value: None,
        })
    }

    /// Effect to switch to, if the selector channel changed
    ///
    /// Nothing is selected until the selector universe has been received.
    pub fn poll(&mut self, store: &UniverseStore) -> Option<&str> {
        let address = PortAddress::from_u16(self.config.universe);
        let universe = store.get(address)?;
        let value = universe.channel(self.config.channel - 1);
        if self.last_value == Some(value) {
            return None;
        }
        self.last_value = Some(value);
        let index = value as usize * self.config.effects.len() / 256;
        self.config.effects.get(index).map(|s| s.as_str())
    }
}

/// Manages the single active effect
pub struct EffectManager {
    registry: EffectRegistry,
    mapper: ChannelMapper,
    width: usize,
    height: usize,
    policy: FaultPolicy,
    active: Option<EffectRuntime>,
    transition: Transition,
    selector: Option<EffectSelector>,
    /// Manual input values that take precedence over DMX
    overrides: BTreeMap<String, InputValue>,
    latest_inputs: EffectInputs,
    /// Frame currently on the wall
    current: PixelFrame,
}

impl EffectManager {
    pub fn new(
        registry: EffectRegistry,
        mapper: ChannelMapper,
        shape: (usize, usize),
        policy: FaultPolicy,
        transition: TransitionPolicy,
        selector: Option<EffectSelector>,
    ) -> Self {
        let (width, height) = shape;
        Self {
            registry,
            mapper,
            width,
            height,
            policy,
            active: None,
            transition: Transition::new(transition),
            selector,
            overrides: BTreeMap::new(),
            latest_inputs: EffectInputs::new(),
            current: PixelFrame::new(width, height),
        }
    }

    /// Name of the active effect
    pub fn active_effect(&self) -> Option<&str> {
        self.active.as_ref().map(|rt| rt.name())
    }

    pub fn status(&self) -> Option<RuntimeStatus> {
        self.active.as_ref().map(|rt| rt.status())
    }

    /// Inputs decoded on the last tick, overrides applied
    pub fn latest_inputs(&self) -> &EffectInputs {
        &self.latest_inputs
    }

    pub fn overrides(&self) -> &BTreeMap<String, InputValue> {
        &self.overrides
    }

    /// Frame currently on the wall
    pub fn current_frame(&self) -> &PixelFrame {
        &self.current
    }

    /// Switch to `name`, tearing down the previous effect
    ///
    /// Selecting the active effect again restarts it, which also clears a
    /// fault.
    pub fn select(&mut self, name: &str) -> Result<(), ConfigError> {
        let effect = self
            .registry
            .create(name)
            .ok_or_else(|| ConfigError::UnknownEffect(name.to_string()))?;

        if let Some(mut previous) = self.active.take() {
            previous.deactivate();
        }
        self.overrides.clear();
        self.transition.begin(self.current.clone());

        let mut runtime = EffectRuntime::new(name, effect, (self.width, self.height), self.policy);
        runtime.activate(&self.current);
        self.active = Some(runtime);

        tracing::info!(effect = name, "Effect selected");
        Ok(())
    }

    /// Clear the active effect's faults and restart it
    pub fn reset(&mut self) {
        if let Some(runtime) = self.active.as_mut() {
            runtime.reset();
        }
    }

    /// Pin an input of the active effect to a value
    pub fn set_override(&mut self, input: &str, value: InputValue) -> Result<(), ConfigError> {
        let effect = self.active_effect().unwrap_or_default().to_string();
        let spec = self
            .mapper
            .schema(&effect)
            .and_then(|schema| schema.iter().find(|s| s.name == input))
            .ok_or_else(|| ConfigError::UnknownInput {
                effect: effect.clone(),
                input: input.to_string(),
            })?;
        if spec.rule != value.rule() {
            return Err(ConfigError::RuleMismatch {
                effect,
                input: input.to_string(),
                expected: spec.rule.name().to_string(),
                found: value.rule().name().to_string(),
            });
        }
        self.overrides.insert(input.to_string(), value);
        Ok(())
    }

    /// Hand every input back to DMX
    pub fn clear_overrides(&mut self) {
        self.overrides.clear();
    }

    /// Produce this tick's frame
    pub fn tick(&mut self, tick: u64, store: &UniverseStore) -> (PixelFrame, TickStatus) {
        let selected = self
            .selector
            .as_mut()
            .and_then(|s| s.poll(store))
            .map(str::to_string);
        if let Some(name) = selected {
            if self.active_effect() != Some(name.as_str()) {
                if let Err(e) = self.select(&name) {
                    tracing::warn!(error = %e, "DMX effect selection failed");
                }
            }
        }

        let Some(runtime) = self.active.as_mut() else {
            return (self.current.clone(), TickStatus::Idle);
        };

        let mut inputs = self.mapper.decode(runtime.name(), store);
        for (name, value) in &self.overrides {
            inputs.set(name.clone(), *value);
        }

        let (frame, status) = runtime.tick(tick, &inputs);
        let frame = self.transition.apply(frame);

        self.latest_inputs = inputs;
        self.current = frame.clone();
        (frame, status)
    }

    /// Deactivate the active effect
    pub fn shutdown(&mut self) {
        if let Some(mut runtime) = self.active.take() {
            runtime.deactivate();
            tracing::info!(effect = runtime.name(), "Effect stopped");
        }
    }
}

impl Drop for EffectManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
