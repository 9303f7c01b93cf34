//! Settings document and its store adapter.
//!
//! The enhancer keeps one small settings document (four LoRA URL slots plus a
//! list of reference images) inside the host's larger persisted settings
//! blob. The store repairs the document on every read and never rejects
//! malformed input: settings must never crash the host UI.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Scoped key the document is stored under inside the host settings blob.
pub const MODULE_NAME: &str = "nanogpt-image-enhancer";

/// One of the four fixed LoRA URL slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoraSlot {
    /// `lora_url_1`
    One,
    /// `lora_url_2`
    Two,
    /// `lora_url_3`
    Three,
    /// `lora_url_4`
    Four,
}

impl LoraSlot {
    /// All four slots, in payload order.
    pub const ALL: [LoraSlot; 4] = [Self::One, Self::Two, Self::Three, Self::Four];

    /// The JSON key this slot is injected under.
    pub fn key(&self) -> &'static str {
        match self {
            Self::One => "lora_url_1",
            Self::Two => "lora_url_2",
            Self::Three => "lora_url_3",
            Self::Four => "lora_url_4",
        }
    }
}

/// The four LoRA URL slots. Exactly these keys are always present; a missing
/// key repairs to the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoraSlots {
    /// URL for slot 1 (may be empty).
    #[serde(default)]
    pub lora_url_1: String,
    /// URL for slot 2 (may be empty).
    #[serde(default)]
    pub lora_url_2: String,
    /// URL for slot 3 (may be empty).
    #[serde(default)]
    pub lora_url_3: String,
    /// URL for slot 4 (may be empty).
    #[serde(default)]
    pub lora_url_4: String,
}

impl LoraSlots {
    /// Returns the value of the given slot.
    pub fn get(&self, slot: LoraSlot) -> &str {
        match slot {
            LoraSlot::One => &self.lora_url_1,
            LoraSlot::Two => &self.lora_url_2,
            LoraSlot::Three => &self.lora_url_3,
            LoraSlot::Four => &self.lora_url_4,
        }
    }

    /// Replaces the value of the given slot.
    pub fn set(&mut self, slot: LoraSlot, value: impl Into<String>) {
        let target = match slot {
            LoraSlot::One => &mut self.lora_url_1,
            LoraSlot::Two => &mut self.lora_url_2,
            LoraSlot::Three => &mut self.lora_url_3,
            LoraSlot::Four => &mut self.lora_url_4,
        };
        *target = value.into();
    }

    /// All slots with their current values, in payload order.
    pub fn entries(&self) -> [(LoraSlot, &str); 4] {
        [
            (LoraSlot::One, self.lora_url_1.as_str()),
            (LoraSlot::Two, self.lora_url_2.as_str()),
            (LoraSlot::Three, self.lora_url_3.as_str()),
            (LoraSlot::Four, self.lora_url_4.as_str()),
        ]
    }

    fn repair(value: Option<&Value>) -> Self {
        let mut slots = Self::default();
        if let Some(map) = value.and_then(Value::as_object) {
            for slot in LoraSlot::ALL {
                if let Some(url) = map.get(slot.key()).and_then(Value::as_str) {
                    slots.set(slot, url);
                }
            }
        }
        slots
    }
}

/// A user-supplied reference image, attached to every matching generation
/// request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceImage {
    /// Display-only label (usually the original file name).
    pub name: String,
    /// Self-contained base64 data URL, bounded by the byte ceiling.
    #[serde(rename = "dataUrl")]
    pub data_url: String,
}

/// The persisted settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancerSettings {
    /// LoRA URL slots, injected only for the LoRA-capable model.
    #[serde(default)]
    pub loras: LoraSlots,
    /// Reference images in insertion order. Insertion order = send order.
    #[serde(default, rename = "referenceImages")]
    pub reference_images: Vec<ReferenceImage>,
}

impl EnhancerSettings {
    /// Coerces an arbitrary JSON value into a well-formed document.
    ///
    /// Missing slot keys backfill to empty strings and a non-array
    /// `referenceImages` coerces to an empty list. This is a migration step,
    /// not validation: no input shape is an error.
    pub fn repair(value: &Value) -> Self {
        let loras = LoraSlots::repair(value.get("loras"));
        let reference_images = value
            .get("referenceImages")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| ReferenceImage {
                        name: entry
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        data_url: entry
                            .get("dataUrl")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            loras,
            reference_images,
        }
    }
}

/// External persistence collaborator. Receives the full document on every
/// (debounced) write-through; where it lands inside the host blob is its
/// concern (see [`MODULE_NAME`]).
pub trait SettingsSink: Send + Sync {
    /// Durably stores the document, replacing any previous version.
    fn persist(&self, settings: &EnhancerSettings);
}

/// Trailing-edge debouncer: each call cancels the previously scheduled run.
///
/// Must be used from within a Tokio runtime.
pub(crate) struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub(crate) fn schedule<F>(&self, run: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.pending.lock().expect("debouncer mutex poisoned");
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        let delay = self.delay;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run();
        }));
    }
}

/// Process-wide adapter over the single settings document.
///
/// Reads repair on access, writes replace the whole document and coalesce
/// into one durable write through the [`SettingsSink`].
pub struct SettingsStore {
    doc: Mutex<Value>,
    sink: Arc<dyn SettingsSink>,
    debouncer: Debouncer,
}

impl SettingsStore {
    /// Creates a store over whatever the persistence collaborator handed back
    /// (possibly `null` or garbage; it is repaired on first access).
    pub fn new(initial: Value, sink: Arc<dyn SettingsSink>, debounce: Duration) -> Self {
        Self {
            doc: Mutex::new(initial),
            sink,
            debouncer: Debouncer::new(debounce),
        }
    }

    /// Returns the current document, repairing its shape in place first.
    ///
    /// Idempotent: repeated calls with no intervening mutation yield
    /// structurally identical documents, always with exactly four slot keys.
    pub fn ensure(&self) -> EnhancerSettings {
        let mut doc = self.doc.lock().expect("settings mutex poisoned");
        let settings = EnhancerSettings::repair(&doc);
        if let Ok(repaired) = serde_json::to_value(&settings) {
            *doc = repaired;
        }
        settings
    }

    /// Replaces the document and schedules a debounced write-through.
    ///
    /// Writes are full-document replacements; bursts from rapid mutations
    /// coalesce into a single durable write. Must be called from within a
    /// Tokio runtime.
    pub fn save(&self, settings: &EnhancerSettings) {
        {
            let mut doc = self.doc.lock().expect("settings mutex poisoned");
            if let Ok(value) = serde_json::to_value(settings) {
                *doc = value;
            }
        }

        let sink = Arc::clone(&self.sink);
        let snapshot = settings.clone();
        self.debouncer.schedule(move || {
            tracing::debug!("persisting enhancer settings");
            sink.persist(&snapshot);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        persists: AtomicUsize,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                persists: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.persists.load(Ordering::SeqCst)
        }
    }

    impl SettingsSink for CountingSink {
        fn persist(&self, _settings: &EnhancerSettings) {
            self.persists.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn store_with(initial: Value, sink: Arc<CountingSink>) -> SettingsStore {
        SettingsStore::new(initial, sink, Duration::from_millis(300))
    }

    #[test]
    fn test_repair_from_null_yields_defaults() {
        let settings = EnhancerSettings::repair(&Value::Null);
        for (_, value) in settings.loras.entries() {
            assert_eq!(value, "");
        }
        assert!(settings.reference_images.is_empty());
    }

    #[test]
    fn test_repair_backfills_missing_slots() {
        let settings = EnhancerSettings::repair(&json!({
            "loras": { "lora_url_2": "https://example.com/lora.safetensors" },
            "referenceImages": "not-a-list",
        }));

        assert_eq!(settings.loras.get(LoraSlot::One), "");
        assert_eq!(
            settings.loras.get(LoraSlot::Two),
            "https://example.com/lora.safetensors"
        );
        assert_eq!(settings.loras.get(LoraSlot::Three), "");
        assert_eq!(settings.loras.get(LoraSlot::Four), "");
        assert!(settings.reference_images.is_empty());
    }

    #[test]
    fn test_repair_keeps_reference_order() {
        let settings = EnhancerSettings::repair(&json!({
            "referenceImages": [
                { "name": "a.png", "dataUrl": "data:image/png;base64,AAAA" },
                { "name": "b.png", "dataUrl": "data:image/png;base64,BBBB" },
            ],
        }));

        assert_eq!(settings.reference_images.len(), 2);
        assert_eq!(settings.reference_images[0].name, "a.png");
        assert_eq!(settings.reference_images[1].name, "b.png");
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let sink = CountingSink::new();
        let store = store_with(json!({ "loras": 17 }), sink);

        let first = store.ensure();
        let second = store.ensure();
        assert_eq!(first, second);

        let keys: Vec<&str> = LoraSlot::ALL.iter().map(|slot| slot.key()).collect();
        assert_eq!(
            keys,
            vec!["lora_url_1", "lora_url_2", "lora_url_3", "lora_url_4"]
        );
    }

    #[test]
    fn test_document_wire_shape() {
        let mut settings = EnhancerSettings::default();
        settings.loras.set(LoraSlot::One, "https://example.com/a");
        settings.reference_images.push(ReferenceImage {
            name: "cat.png".into(),
            data_url: "data:image/png;base64,AAAA".into(),
        });

        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["loras"]["lora_url_1"], "https://example.com/a");
        assert_eq!(value["loras"]["lora_url_4"], "");
        assert_eq!(value["referenceImages"][0]["dataUrl"], "data:image/png;base64,AAAA");
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_coalesces_bursts_into_one_persist() {
        let sink = CountingSink::new();
        let store = store_with(Value::Null, Arc::clone(&sink));

        let mut settings = store.ensure();
        settings.loras.set(LoraSlot::One, "https://example.com/first");
        store.save(&settings);
        settings.loras.set(LoraSlot::One, "https://example.com/second");
        store.save(&settings);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.count(), 1);

        let persisted = store.ensure();
        assert_eq!(persisted.loras.get(LoraSlot::One), "https://example.com/second");
    }
}
