//! Effect registry
//!
//! Static catalog of the selectable shader effects. Each entry pairs display
//! metadata with a complete WGSL program: a fullscreen-triangle vertex stage
//! that passes UV through (mirrored to match the camera preview) and a
//! fragment stage that samples the camera texture under the shared
//! `{time, intensity}` uniform block. Adding an effect means adding a WGSL
//! file and one `register` call here; no pipeline code changes.

use std::collections::HashMap;

/// Id of the reserved identity effect that passes the source through.
pub const NONE_EFFECT: &str = "none";

/// Display metadata for an effect
#[derive(Clone, Copy, Debug)]
pub struct EffectInfo {
    /// Unique identifier (registry key)
    pub id: &'static str,
    /// Human-readable display name
    pub name: &'static str,
    /// One-line description shown in the control panel
    pub description: &'static str,
    /// Valid intensity range, inclusive
    pub intensity_range: [f32; 2],
    /// Intensity applied when the effect is first selected
    pub default_intensity: f32,
}

/// A registered effect: metadata plus its complete WGSL program
pub struct Effect {
    pub info: EffectInfo,
    pub shader: &'static str,
}

/// Registry of available effects
///
/// Insertion order defines display order. Lookup by id; an unknown id is a
/// recoverable not-found, never an error.
pub struct EffectRegistry {
    effects: Vec<Effect>,
    index: HashMap<&'static str, usize>,
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EffectRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            effects: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in catalog
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(Effect {
            info: EffectInfo {
                id: NONE_EFFECT,
                name: "None",
                description: "Shows the source feed unmodified",
                intensity_range: [0.0, 1.0],
                default_intensity: 0.0,
            },
            shader: include_str!("../shaders/none.wgsl"),
        });

        registry.register(Effect {
            info: EffectInfo {
                id: "wave",
                name: "Wave",
                description: "Ripples the image by displacing UV coordinates",
                intensity_range: [0.0, 2.0],
                default_intensity: 1.0,
            },
            shader: include_str!("../shaders/wave.wgsl"),
        });

        registry.register(Effect {
            info: EffectInfo {
                id: "distortion",
                name: "Distortion",
                description: "Radial warp pulsing outward from the center",
                intensity_range: [0.0, 2.0],
                default_intensity: 1.0,
            },
            shader: include_str!("../shaders/distortion.wgsl"),
        });

        registry.register(Effect {
            info: EffectInfo {
                id: "invert",
                name: "Color Invert (Spiral)",
                description: "Inverts colors along an animated spiral pattern",
                intensity_range: [0.0, 2.0],
                default_intensity: 0.5,
            },
            shader: include_str!("../shaders/invert_spiral.wgsl"),
        });

        registry.register(Effect {
            info: EffectInfo {
                id: "glitch",
                name: "Glitch",
                description: "Digital noise with scanline tears and RGB split",
                intensity_range: [0.0, 2.0],
                default_intensity: 0.5,
            },
            shader: include_str!("../shaders/glitch.wgsl"),
        });

        registry
    }

    /// Register an effect. Re-registering an id replaces the effect in place,
    /// keeping its display position.
    pub fn register(&mut self, effect: Effect) {
        match self.index.get(effect.info.id) {
            Some(&pos) => {
                log::warn!("Effect '{}' registered twice, replacing", effect.info.id);
                self.effects[pos] = effect;
            }
            None => {
                self.index.insert(effect.info.id, self.effects.len());
                self.effects.push(effect);
            }
        }
    }

    /// Get an effect by id
    pub fn get(&self, id: &str) -> Option<&Effect> {
        self.index.get(id).map(|&pos| &self.effects[pos])
    }

    /// Check if an effect id is registered
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All effect infos in display order
    pub fn list(&self) -> impl Iterator<Item = &EffectInfo> {
        self.effects.iter().map(|e| &e.info)
    }

    /// Number of registered effects
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_new() {
        let registry = EffectRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_builtin_has_identity_effect() {
        let registry = EffectRegistry::builtin();
        let none = registry.get(NONE_EFFECT).expect("'none' must be registered");
        assert_eq!(none.info.id, NONE_EFFECT);
        assert_eq!(none.info.default_intensity, 0.0);
    }

    #[test]
    fn test_builtin_order_is_stable() {
        let registry = EffectRegistry::builtin();
        let ids: Vec<&str> = registry.list().map(|info| info.id).collect();
        assert_eq!(ids[0], NONE_EFFECT);
        assert_eq!(ids, ["none", "wave", "distortion", "invert", "glitch"]);
    }

    #[test]
    fn test_no_duplicate_ids() {
        let registry = EffectRegistry::builtin();
        let mut seen = std::collections::HashSet::new();
        for info in registry.list() {
            assert!(seen.insert(info.id), "duplicate effect id {}", info.id);
        }
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let registry = EffectRegistry::builtin();
        assert!(registry.get("does-not-exist").is_none());
        assert!(!registry.contains("does-not-exist"));
    }

    #[test]
    fn test_reregister_keeps_position() {
        let mut registry = EffectRegistry::builtin();
        let count = registry.len();
        registry.register(Effect {
            info: EffectInfo {
                id: "wave",
                name: "Wave 2",
                description: "replacement",
                intensity_range: [0.0, 2.0],
                default_intensity: 1.0,
            },
            shader: include_str!("../shaders/wave.wgsl"),
        });
        assert_eq!(registry.len(), count);
        let ids: Vec<&str> = registry.list().map(|info| info.id).collect();
        assert_eq!(ids[1], "wave");
        assert_eq!(registry.get("wave").unwrap().info.name, "Wave 2");
    }

    #[test]
    fn test_every_shader_satisfies_the_program_contract() {
        let registry = EffectRegistry::builtin();
        for info in registry.list() {
            let effect = registry.get(info.id).unwrap();
            // Complete program: both entry points and the source texture binding
            assert!(effect.shader.contains("fn vs_main"), "{}", info.id);
            assert!(effect.shader.contains("fn fs_main"), "{}", info.id);
            assert!(
                effect.shader.contains("@group(0) @binding(0)"),
                "{}",
                info.id
            );
        }
    }

    #[test]
    fn test_intensity_ranges_are_ordered() {
        let registry = EffectRegistry::builtin();
        for info in registry.list() {
            let [min, max] = info.intensity_range;
            assert!(min <= max, "{}", info.id);
            assert!(info.default_intensity >= min && info.default_intensity <= max);
        }
    }
}
