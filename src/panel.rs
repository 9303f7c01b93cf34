//! Presentation bindings.
//!
//! Thin glue between the host UI and the core: a view model for the
//! reference image list, debounced LoRA slot edits, and the mutations the
//! panel controls trigger. The host renders; this module only decides what
//! gets rendered and keeps the settings document as the single source of
//! truth.

use crate::error::Result;
use crate::ingest::ImageIngestor;
use crate::intercept::LORA_MODEL;
use crate::settings::{Debouncer, EnhancerSettings, LoraSlot, SettingsStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Debounce applied to LoRA slot text inputs before persisting.
pub const SLOT_INPUT_DEBOUNCE: Duration = Duration::from_millis(300);

const WAIT_ATTEMPTS: u32 = 20;
const WAIT_INTERVAL: Duration = Duration::from_millis(250);

/// Which of the two mutually exclusive LoRA panel states is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoraVisibility {
    /// The four URL inputs, shown for the LoRA-capable model.
    Fields,
    /// The "not supported by this model" notice, shown otherwise.
    Notice,
}

/// Returns the panel state for the currently selected model.
pub fn lora_visibility(model: &str) -> LoraVisibility {
    if model == LORA_MODEL {
        LoraVisibility::Fields
    } else {
        LoraVisibility::Notice
    }
}

/// One row of the reference image list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRow {
    /// Position in the document (and the remove target).
    pub index: usize,
    /// Display label, falling back to `Reference N` for unnamed entries.
    pub label: String,
    /// Preview data URL.
    pub data_url: String,
}

/// Full view of the reference list. Idempotent: always rebuilt from the
/// current document, never an incremental diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceListView {
    /// Rows in display (= send) order.
    pub rows: Vec<ReferenceRow>,
}

impl ReferenceListView {
    /// Builds the view from the current document.
    pub fn render(settings: &EnhancerSettings) -> Self {
        let rows = settings
            .reference_images
            .iter()
            .enumerate()
            .map(|(index, image)| ReferenceRow {
                index,
                label: if image.name.is_empty() {
                    format!("Reference {}", index + 1)
                } else {
                    image.name.clone()
                },
                data_url: image.data_url.clone(),
            })
            .collect();
        Self { rows }
    }

    /// True when the empty-state placeholder should be shown instead.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Bindings for the settings panel controls.
pub struct PanelBindings {
    store: Arc<SettingsStore>,
    ingestor: ImageIngestor,
    slot_debouncers: [Debouncer; 4],
}

impl PanelBindings {
    /// Creates bindings over the shared store and ingestor.
    pub fn new(store: Arc<SettingsStore>, ingestor: ImageIngestor) -> Self {
        Self {
            store,
            ingestor,
            slot_debouncers: [
                Debouncer::new(SLOT_INPUT_DEBOUNCE),
                Debouncer::new(SLOT_INPUT_DEBOUNCE),
                Debouncer::new(SLOT_INPUT_DEBOUNCE),
                Debouncer::new(SLOT_INPUT_DEBOUNCE),
            ],
        }
    }

    /// Ingests a selected file, appends it to the document, persists, and
    /// returns the fresh list view.
    ///
    /// On error nothing is mutated; the caller surfaces the warning and
    /// clears the file input either way.
    pub async fn handle_file_selection(&self, path: impl AsRef<Path>) -> Result<ReferenceListView> {
        let entry = self.ingestor.ingest_file(path).await?;

        let mut settings = self.store.ensure();
        settings.reference_images.push(entry);
        self.store.save(&settings);

        Ok(ReferenceListView::render(&settings))
    }

    /// Removes the entry at `index`, persists, and returns the fresh view.
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of range; the panel only offers remove
    /// buttons for rows that exist.
    pub fn remove_reference(&self, index: usize) -> ReferenceListView {
        let mut settings = self.store.ensure();
        settings.reference_images.remove(index);
        self.store.save(&settings);

        ReferenceListView::render(&settings)
    }

    /// Applies a slot edit after the input debounce, then persists.
    pub fn set_lora_slot(&self, slot: LoraSlot, value: impl Into<String>) {
        let store = Arc::clone(&self.store);
        let value = value.into();
        let debouncer = &self.slot_debouncers[match slot {
            LoraSlot::One => 0,
            LoraSlot::Two => 1,
            LoraSlot::Three => 2,
            LoraSlot::Four => 3,
        }];

        debouncer.schedule(move || {
            let mut settings = store.ensure();
            settings.loras.set(slot, value);
            store.save(&settings);
        });
    }
}

/// Polls `probe` until it yields a value, with a bounded number of attempts.
///
/// The host panel mounts asynchronously; this is the fallback used to attach
/// to it when no mount event is available. Defaults live in
/// [`wait_for_default`].
pub async fn wait_for<T, F>(probe: F, attempts: u32, interval: Duration) -> Option<T>
where
    F: Fn() -> Option<T>,
{
    for _ in 0..attempts {
        if let Some(found) = probe() {
            return Some(found);
        }
        tokio::time::sleep(interval).await;
    }
    None
}

/// [`wait_for`] with the standard 20 x 250ms schedule.
pub async fn wait_for_default<T, F>(probe: F) -> Option<T>
where
    F: Fn() -> Option<T>,
{
    wait_for(probe, WAIT_ATTEMPTS, WAIT_INTERVAL).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ReferenceImage, SettingsSink};
    use serde_json::{json, Value};
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

    fn bindings(doc: Value, sink: Arc<CountingSink>) -> PanelBindings {
        let store = Arc::new(SettingsStore::new(doc, sink, Duration::from_millis(100)));
        PanelBindings::new(store, ImageIngestor::default())
    }

    #[test]
    fn test_lora_visibility_states() {
        assert_eq!(lora_visibility("flux-2-dev-lora"), LoraVisibility::Fields);
        assert_eq!(lora_visibility("other-model"), LoraVisibility::Notice);
        assert_eq!(lora_visibility(""), LoraVisibility::Notice);
    }

    #[test]
    fn test_render_empty_list() {
        let view = ReferenceListView::render(&EnhancerSettings::default());
        assert!(view.is_empty());
    }

    #[test]
    fn test_render_labels_fall_back_to_position() {
        let mut settings = EnhancerSettings::default();
        settings.reference_images.push(ReferenceImage {
            name: "cat.png".into(),
            data_url: "data:image/png;base64,AAAA".into(),
        });
        settings.reference_images.push(ReferenceImage {
            name: String::new(),
            data_url: "data:image/png;base64,BBBB".into(),
        });

        let view = ReferenceListView::render(&settings);
        assert_eq!(view.rows[0].label, "cat.png");
        assert_eq!(view.rows[1].label, "Reference 2");
        assert_eq!(view.rows[1].index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_shifts_remaining_entry_and_persists_once() {
        let sink = CountingSink::new();
        let bindings = bindings(
            json!({
                "referenceImages": [
                    { "name": "first.png", "dataUrl": "one" },
                    { "name": "second.png", "dataUrl": "two" },
                ],
            }),
            Arc::clone(&sink),
        );

        let view = bindings.remove_reference(0);
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].index, 0);
        assert_eq!(view.rows[0].label, "second.png");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_edits_debounce_to_last_value() {
        let sink = CountingSink::new();
        let panel = bindings(Value::Null, Arc::clone(&sink));

        panel.set_lora_slot(LoraSlot::Three, "https://example.com/draft");
        panel.set_lora_slot(LoraSlot::Three, "https://example.com/final");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.count(), 1);
        assert_eq!(
            panel.store.ensure().loras.get(LoraSlot::Three),
            "https://example.com/final"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ingestion_leaves_document_unmutated() {
        let sink = CountingSink::new();
        let store = Arc::new(SettingsStore::new(
            Value::Null,
            Arc::clone(&sink) as Arc<dyn SettingsSink>,
            Duration::from_millis(100),
        ));
        let panel = PanelBindings::new(Arc::clone(&store), ImageIngestor::default());

        let result = panel.handle_file_selection("/definitely/missing/file.png").await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.count(), 0);
        assert!(store.ensure().reference_images.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_bounds_attempts() {
        let calls = AtomicUsize::new(0);
        let missing: Option<()> = wait_for(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                None
            },
            5,
            Duration::from_millis(250),
        )
        .await;

        assert!(missing.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let found = wait_for(
            || {
                if calls.fetch_add(1, Ordering::SeqCst) >= 7 {
                    Some("panel")
                } else {
                    None
                }
            },
            5,
            Duration::from_millis(250),
        )
        .await;
        assert_eq!(found, Some("panel"));
    }
}
