//! The deck: controls for both pages plus the feedback loop
//!
//! A physical key press is looked up on the active page, handed to that
//! slot's control, and its result fed to the feedback controller. Each
//! press runs on its own task so a slow port never holds up other keys.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::control::{Control, ControlContext, ControlKind, KeyFace};
use crate::dispatch::DispatchResult;
use crate::feedback::FeedbackController;
use crate::mapping::{Page, KEYS_PER_PAGE};

pub struct Deck {
    /// One control per table index (both pages)
    controls: Vec<Arc<dyn Control>>,
    feedback: Arc<FeedbackController>,
}

impl Deck {
    /// Build controls for both pages. Slots without an entry in
    /// `overrides` (keyed by table index) are key mapping controls.
    pub fn new(
        ctx: &ControlContext,
        feedback: Arc<FeedbackController>,
        overrides: &HashMap<u32, ControlKind>,
    ) -> Self {
        let default_kind = ControlKind::default();
        let controls = (0..KEYS_PER_PAGE * 2)
            .map(|index| {
                overrides
                    .get(&index)
                    .unwrap_or(&default_kind)
                    .build(index, ctx)
            })
            .collect();

        Self { controls, feedback }
    }

    fn control(&self, key_no: u32, page: Page) -> Option<&Arc<dyn Control>> {
        if key_no >= KEYS_PER_PAGE {
            return None;
        }
        self.controls.get((key_no + page.offset()) as usize)
    }

    /// Initialize every control on a page, returning their faces in key order
    pub async fn initialize(&self, page: Page) -> Vec<KeyFace> {
        let mut faces = Vec::with_capacity(KEYS_PER_PAGE as usize);
        for key_no in 0..KEYS_PER_PAGE {
            if let Some(control) = self.control(key_no, page) {
                faces.push(control.initialize().await);
            }
        }
        faces
    }

    /// Handle one press to completion
    pub async fn press(&self, key_no: u32, page: Page) -> Option<DispatchResult> {
        let Some(control) = self.control(key_no, page) else {
            warn!("Key {} is outside the deck (0-{})", key_no, KEYS_PER_PAGE - 1);
            return None;
        };

        debug!("Key {} pressed on {:?} page", key_no, page);
        let result = control.pressed().await?;
        self.feedback.on_result(key_no, result);
        Some(result)
    }

    /// Handle a press on its own task
    pub fn spawn_press(
        self: &Arc<Self>,
        key_no: u32,
        page: Page,
    ) -> JoinHandle<Option<DispatchResult>> {
        let deck = self.clone();
        tokio::spawn(async move { deck.press(key_no, page).await })
    }

    /// Current face of a physical key
    pub fn face(&self, key_no: u32, page: Page) -> Option<KeyFace> {
        let control = self.control(key_no, page)?;
        Some(control.render(self.feedback.phase(key_no), self.feedback.error(key_no)))
    }
}
