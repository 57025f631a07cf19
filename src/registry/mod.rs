//! Processor registry.
//!
//! A compile-time table of named constructors, selected at startup by the
//! tiered manifest. Adding a processor means registering a factory here and
//! listing it in the manifest; the router never changes.

pub mod manifest;

pub use manifest::{Manifest, ProcessorDescriptor, Tier};

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::error::RegistryError;
use crate::metrics::registry as registry_metrics;
use crate::processors::{DialogueProcessor, MemoryProcessor, Processor};

/// Builds one processor instance.
pub type ProcessorFactory =
    Box<dyn Fn(&AppContext) -> anyhow::Result<Arc<dyn Processor>> + Send + Sync>;

struct Registration {
    module_path: String,
    type_name: String,
    factory: ProcessorFactory,
}

/// Named processor constructors.
pub struct ProcessorRegistry {
    factories: HashMap<String, Registration>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in processors.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DialogueProcessor::NAME, "processors/dialogue", |ctx| {
            Ok(Arc::new(DialogueProcessor::new(Arc::clone(&ctx.router))))
        });
        registry.register(MemoryProcessor::NAME, "processors/memory", |ctx| {
            Ok(Arc::new(MemoryProcessor::new(ctx)))
        });
        registry
    }

    /// Register a constructor for `name` living at `module_path`. A later
    /// registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: &str, module_path: &str, factory: F)
    where
        F: Fn(&AppContext) -> anyhow::Result<Arc<dyn Processor>> + Send + Sync + 'static,
    {
        let registration = Registration {
            module_path: module_path.to_string(),
            type_name: type_name_for(name),
            factory: Box::new(factory),
        };
        if self.factories.insert(name.to_string(), registration).is_some() {
            warn!(processor = name, "Processor factory replaced");
        }
        tracing::debug!("Registered processor factory: {}", name);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate every loadable manifest entry. Entries that cannot be
    /// resolved are logged, counted and skipped.
    pub fn load(&self, manifest: &Manifest, ctx: &AppContext) -> Processors {
        for rejected in &manifest.rejected {
            skip(rejected);
        }

        let mut loaded: HashMap<String, Arc<dyn Processor>> = HashMap::new();
        for descriptor in &manifest.descriptors {
            if !descriptor.should_load() {
                info!(processor = %descriptor.name, tier = %descriptor.tier, "Processor disabled");
                continue;
            }
            if loaded.contains_key(&descriptor.name) {
                warn!(processor = %descriptor.name, tier = %descriptor.tier, "Duplicate processor entry ignored");
                continue;
            }
            match self.resolve(descriptor, ctx) {
                Ok(processor) => {
                    info!(
                        processor = %descriptor.name,
                        tier = %descriptor.tier,
                        path = %descriptor.module_path,
                        "Processor loaded"
                    );
                    loaded.insert(descriptor.name.clone(), processor);
                }
                Err(e) => skip(&e),
            }
        }

        info!(count = loaded.len(), "Processor registry loaded");
        Processors { loaded }
    }

    fn resolve(
        &self,
        descriptor: &ProcessorDescriptor,
        ctx: &AppContext,
    ) -> Result<Arc<dyn Processor>, RegistryError> {
        let registration =
            self.factories
                .get(&descriptor.name)
                .ok_or_else(|| RegistryError::Unresolved {
                    name: descriptor.name.clone(),
                    path: descriptor.module_path.clone(),
                    type_name: type_name_for(&descriptor.name),
                })?;

        if normalize_path(&descriptor.module_path) != normalize_path(&registration.module_path) {
            return Err(RegistryError::PathMismatch {
                name: descriptor.name.clone(),
                path: descriptor.module_path.clone(),
                expected: registration.module_path.clone(),
            });
        }

        (registration.factory)(ctx).map_err(|e| RegistryError::ConstructionFailed {
            name: registration.type_name.clone(),
            reason: format!("{e:#}"),
        })
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn skip(e: &RegistryError) {
    error!(error = %e, "Skipping processor");
    counter!(registry_metrics::ENTRIES_SKIPPED_TOTAL).increment(1);
}

/// `memory` → `MemoryProcessor`.
fn type_name_for(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("{}{}Processor", first.to_uppercase(), chars.as_str()),
        None => "Processor".to_string(),
    }
}

/// `processors/memory`, `processors.memory` and `./processors/memory/` all
/// name the same module.
fn normalize_path(path: &str) -> String {
    path.trim()
        .trim_start_matches("./")
        .replace('/', ".")
        .trim_matches('.')
        .to_string()
}

/// Live processors keyed by name, owned for the life of the process.
pub struct Processors {
    loaded: HashMap<String, Arc<dyn Processor>>,
}

impl Processors {
    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.loaded.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.loaded.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Release every processor. Failures are logged; the rest still release.
    pub async fn release_all(&self) {
        for (name, processor) in &self.loaded {
            match processor.release().await {
                Ok(()) => info!(processor = %name, "Processor released"),
                Err(e) => warn!(processor = %name, error = %e, "Processor release failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::AppConfig;
    use crate::error::ProcessorError;
    use crate::router::testing::{FakeRag, RecordingPublisher};

    fn context() -> AppContext {
        AppContext::new(
            AppConfig::default(),
            Arc::new(FakeRag::default()),
            Arc::new(RecordingPublisher::default()),
            CancellationToken::new(),
        )
    }

    fn manifest(raw: &str) -> Manifest {
        Manifest::parse(raw, Path::new("registry.yaml")).unwrap()
    }

    struct Upper;

    #[async_trait]
    impl Processor for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        async fn handle(&self, content: &str) -> Result<Value, ProcessorError> {
            Ok(json!(content.to_uppercase()))
        }
        async fn release(&self) -> Result<(), ProcessorError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn malformed_user_entry_does_not_block_base() {
        let registry = ProcessorRegistry::builtin();
        let processors = registry.load(
            &manifest(
                r#"
modules:
  base:
    dialogue: { path: processors/dialogue }
    memory: { path: processors/memory }
  user:
    emotion: { enabled: true }
"#,
            ),
            &context(),
        );

        assert_eq!(processors.len(), 2);
        assert_eq!(processors.names(), ["dialogue", "memory"]);
        processors.release_all().await;
    }

    #[tokio::test]
    async fn unknown_processor_is_skipped() {
        let registry = ProcessorRegistry::builtin();
        let processors = registry.load(
            &manifest(
                r#"
modules:
  base:
    dialogue: { path: processors/dialogue }
  system:
    emotion: { path: processors/emotion, value: true }
"#,
            ),
            &context(),
        );
        assert_eq!(processors.names(), ["dialogue"]);
        assert!(processors.get("emotion").is_none());
    }

    #[tokio::test]
    async fn disabled_tiers_are_not_instantiated() {
        let registry = ProcessorRegistry::builtin();
        let processors = registry.load(
            &manifest(
                r#"
modules:
  base: {}
  system:
    memory: { path: processors/memory, enabled: false }
  user:
    dialogue: { path: processors/dialogue }
"#,
            ),
            &context(),
        );
        assert!(processors.is_empty());
    }

    #[tokio::test]
    async fn path_must_match_registration() {
        let registry = ProcessorRegistry::builtin();
        let processors = registry.load(
            &manifest(
                r#"
modules:
  base:
    dialogue: { path: processors.dialogue }
    memory: { path: somewhere/else }
"#,
            ),
            &context(),
        );
        assert_eq!(processors.names(), ["dialogue"]);
    }

    #[tokio::test]
    async fn failing_factory_is_skipped() {
        let mut registry = ProcessorRegistry::builtin();
        registry.register("broken", "processors/broken", |_| {
            anyhow::bail!("no model weights")
        });
        registry.register("upper", "processors/upper", |_| Ok(Arc::new(Upper)));

        let processors = registry.load(
            &manifest(
                r#"
modules:
  base:
    broken: { path: processors/broken }
    upper: { path: processors/upper }
"#,
            ),
            &context(),
        );

        assert_eq!(processors.names(), ["upper"]);
        let upper = processors.get("upper").unwrap();
        assert_eq!(upper.handle("hi").await.unwrap(), json!("HI"));
    }

    #[test]
    fn type_names_follow_convention() {
        assert_eq!(type_name_for("memory"), "MemoryProcessor");
        assert_eq!(type_name_for("dialogue"), "DialogueProcessor");
    }

    #[test]
    fn paths_normalise_separators() {
        assert_eq!(normalize_path("processors/memory"), "processors.memory");
        assert_eq!(normalize_path("./processors/memory/"), "processors.memory");
        assert_eq!(normalize_path("processors.memory"), "processors.memory");
    }

    #[test]
    fn builtin_names() {
        assert_eq!(ProcessorRegistry::builtin().names(), ["dialogue", "memory"]);
    }
}
