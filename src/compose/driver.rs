//! Executes composer effects against the transport.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::session::{Session, SessionStore};
use super::{ui, Effect, EntryId, Input, Prompt};
use crate::fanout::{Envelope, FanoutEngine};
use crate::message::MessageSegment;
use crate::reporter::{ErrorEvent, ErrorSink};
use crate::store::{StoreError, WatermarkStore};
use crate::transport::{send_segment, DeliveryError, Markup, MessageRef, Transport};

/// What the caller still has to do after an input was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverOutcome {
    /// Acknowledgement for the button press that caused the input.
    pub notice: Option<(String, bool)>,
    /// The input was not valid in the current state.
    pub unknown: bool,
    /// The session reached `Done` and was removed.
    pub finished: bool,
}

/// Applies operator inputs to sessions and performs the resulting effects.
pub struct ComposerDriver {
    transport: Arc<dyn Transport>,
    fanout: Arc<FanoutEngine>,
    store: WatermarkStore,
    sink: Arc<dyn ErrorSink>,
}

impl ComposerDriver {
    /// Create a driver.
    pub fn new(
        transport: Arc<dyn Transport>,
        fanout: Arc<FanoutEngine>,
        store: WatermarkStore,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            transport,
            fanout,
            store,
            sink,
        }
    }

    /// Start a fresh session for `user_id` in `chat_id`, replacing any
    /// running one.
    ///
    /// # Errors
    ///
    /// Returns a storage failure raised while executing effects.
    pub async fn begin(
        &self,
        sessions: &SessionStore,
        user_id: u64,
        chat_id: i64,
    ) -> Result<DriverOutcome, StoreError> {
        let session = sessions.start(user_id, chat_id).await;
        let mut session = session.lock().await;
        let effects = session.composer.start();
        info!(user_id, chat_id, "composer session started");
        self.execute(&mut session, effects).await
    }

    /// Apply `input` to the session of `user_id`. Returns `None` when the
    /// user has no session.
    ///
    /// # Errors
    ///
    /// Returns a storage failure raised while executing effects.
    pub async fn dispatch(
        &self,
        sessions: &SessionStore,
        user_id: u64,
        input: Input,
    ) -> Result<Option<DriverOutcome>, StoreError> {
        let Some(session) = sessions.get(user_id).await else {
            return Ok(None);
        };
        let mut session = session.lock().await;
        debug!(user_id, state = ?session.composer.state(), ?input, "composer input");
        let effects = session.composer.handle(input);
        let mut outcome = self.execute(&mut session, effects).await?;
        if session.composer.is_done() {
            sessions.remove(user_id).await;
            outcome.finished = true;
            info!(user_id, "composer session finished");
        }
        Ok(Some(outcome))
    }

    /// Perform `effects` in order, feeding results back into the composer.
    ///
    /// # Errors
    ///
    /// Returns a storage failure; transport failures are logged and reported.
    pub async fn execute(
        &self,
        session: &mut Session,
        effects: Vec<Effect>,
    ) -> Result<DriverOutcome, StoreError> {
        let mut outcome = DriverOutcome::default();
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Prompt(prompt) => self.show_prompt(session, &prompt).await,
                Effect::RenderPreview { stale } => {
                    self.clear_controls(session.chat_id, &stale).await;
                    self.render_preview(session).await;
                }
                Effect::UpdatePreview {
                    preview,
                    entry,
                    was_image,
                    caption_only,
                } => {
                    self.update_preview(session, preview, entry, was_image, caption_only)
                        .await;
                }
                Effect::AskDeleteConfirm { preview } => {
                    let msg = message(session.chat_id, preview);
                    let controls = ui::delete_confirm_controls();
                    if let Err(e) = self.transport.edit_markup(msg, Some(&controls)).await {
                        warn!(error = %e, "failed to show delete confirmation");
                    }
                }
                Effect::RestorePreviewControls { preview, is_image } => {
                    let msg = message(session.chat_id, preview);
                    let controls = ui::preview_controls(is_image);
                    if let Err(e) = self.transport.edit_markup(msg, Some(&controls)).await {
                        warn!(error = %e, "failed to restore preview controls");
                    }
                }
                Effect::CollapsePreview { preview, is_image } => {
                    let msg = message(session.chat_id, preview);
                    let result = if is_image {
                        self.transport
                            .edit_caption(msg, ui::COLLAPSED_PREVIEW, false, None)
                            .await
                    } else {
                        self.transport
                            .edit_text(msg, ui::COLLAPSED_PREVIEW, false, None)
                            .await
                    };
                    if let Err(e) = result {
                        warn!(error = %e, "failed to collapse preview");
                    }
                }
                Effect::ClearPreviewControls { previews } => {
                    self.clear_controls(session.chat_id, &previews).await;
                }
                Effect::Broadcast { segments } => {
                    let follow = self.broadcast(session, &segments).await?;
                    for effect in follow.into_iter().rev() {
                        queue.push_front(effect);
                    }
                }
                Effect::Notice { text, alert } => outcome.notice = Some((text, alert)),
                Effect::Unknown => outcome.unknown = true,
            }
        }
        Ok(outcome)
    }

    async fn show_prompt(&self, session: &mut Session, prompt: &Prompt) {
        if let Some(previous) = session.prompt.take() {
            if let Err(e) = self.transport.delete(previous).await {
                debug!(error = %e, "failed to delete previous prompt");
            }
        }
        let text = ui::prompt_text(prompt, &session.composer);
        let keyboard = ui::keyboard(&session.composer);
        match self
            .transport
            .send_text(session.chat_id, &text, false, Some(&keyboard))
            .await
        {
            Ok(sent) => session.prompt = Some(sent),
            Err(e) => warn!(chat_id = session.chat_id, error = %e, "failed to send prompt"),
        }
    }

    async fn clear_controls(&self, chat_id: i64, previews: &[i32]) {
        for &preview in previews {
            if let Err(e) = self.transport.edit_markup(message(chat_id, preview), None).await {
                debug!(preview, error = %e, "failed to clear preview controls");
            }
        }
    }

    async fn render_preview(&self, session: &mut Session) {
        let entries: Vec<(EntryId, MessageSegment)> = session
            .composer
            .draft()
            .entries()
            .iter()
            .map(|e| (e.id, e.segment.clone()))
            .collect();

        for (id, segment) in entries {
            let controls = ui::preview_controls(segment.is_image());
            let sent = match send_segment(
                self.transport.as_ref(),
                session.chat_id,
                &segment,
                Some(&controls),
            )
            .await
            {
                Ok(sent) => Ok(sent),
                Err(DeliveryError::Format(reason)) => {
                    session.composer.mark_render_failed(id);
                    let literal = segment.as_literal(&format!("{}{reason}", ui::CANNOT_PARSE));
                    send_segment(
                        self.transport.as_ref(),
                        session.chat_id,
                        &literal,
                        Some(&controls),
                    )
                    .await
                }
                Err(e) => {
                    // Keep a message the operator can edit or delete.
                    session.composer.mark_render_failed(id);
                    self.report_preview_failure(session.chat_id, &e).await;
                    let placeholder = format!("{}{}{e}", ui::UNRENDERED_PREVIEW, ui::CANNOT_PARSE);
                    self.transport
                        .send_text(
                            session.chat_id,
                            &placeholder,
                            false,
                            Some(&ui::preview_controls(false)),
                        )
                        .await
                }
            };
            match sent {
                Ok(sent) => session.composer.record_preview(sent.message_id, id),
                Err(e) => self.report_preview_failure(session.chat_id, &e).await,
            }
        }
    }

    async fn update_preview(
        &self,
        session: &mut Session,
        preview: i32,
        entry: EntryId,
        was_image: bool,
        caption_only: bool,
    ) {
        let Some(segment) = session
            .composer
            .draft()
            .get(entry)
            .map(|e| e.segment.clone())
        else {
            return;
        };
        let msg = message(session.chat_id, preview);
        let controls = ui::preview_controls(segment.is_image());

        if segment.is_image() != was_image {
            let notice = ui::kind_changed_notice(was_image);
            let result = if was_image {
                self.transport
                    .edit_caption(msg, notice, false, Some(&controls))
                    .await
            } else {
                self.transport
                    .edit_text(msg, notice, false, Some(&controls))
                    .await
            };
            if let Err(e) = result {
                warn!(error = %e, "failed to flag changed preview");
            }
            return;
        }

        let result = match self
            .edit_in_place(msg, &segment, caption_only, &controls)
            .await
        {
            Err(DeliveryError::Format(reason)) => {
                session.composer.mark_render_failed(entry);
                let literal = segment.as_literal(&format!("{}{reason}", ui::CANNOT_PARSE));
                self.edit_in_place(msg, &literal, caption_only, &controls)
                    .await
            }
            other => other,
        };
        if let Err(e) = result {
            self.report_preview_failure(session.chat_id, &e).await;
        }
    }

    async fn edit_in_place(
        &self,
        msg: MessageRef,
        segment: &MessageSegment,
        caption_only: bool,
        controls: &Markup,
    ) -> Result<(), DeliveryError> {
        match segment {
            MessageSegment::Text { body, formatted } => {
                self.transport
                    .edit_text(msg, body, *formatted, Some(controls))
                    .await
            }
            MessageSegment::Image {
                caption, formatted, ..
            } if caption_only => {
                self.transport
                    .edit_caption(msg, caption, *formatted, Some(controls))
                    .await
            }
            MessageSegment::Image {
                source,
                caption,
                formatted,
                ..
            } => {
                self.transport
                    .edit_media(msg, source, caption, *formatted, Some(controls))
                    .await
            }
        }
    }

    async fn broadcast(
        &self,
        session: &mut Session,
        segments: &[MessageSegment],
    ) -> Result<Vec<Effect>, StoreError> {
        let envelopes = Envelope::wrap_all(segments);
        let destinations = self.store.destination_ids().await?;
        info!(
            segments = segments.len(),
            destinations = destinations.len(),
            "operator broadcast started"
        );
        match self
            .fanout
            .broadcast_with_canary(&envelopes, session.chat_id, &destinations)
            .await
        {
            Ok(report) => {
                let gone = report.gone();
                if !gone.is_empty() {
                    let removed = self.store.remove_destinations(&gone).await?;
                    info!(removed, "unreachable destinations removed");
                }
                Ok(session.composer.broadcast_finished(&report))
            }
            Err(rejected) => Ok(session
                .composer
                .canary_rejected(rejected.segment_index, &rejected.reason)),
        }
    }

    async fn report_preview_failure(&self, chat_id: i64, error: &DeliveryError) {
        warn!(chat_id, error = %error, "preview could not be rendered");
        self.sink
            .report(
                ErrorEvent::new("compose", "preview could not be rendered")
                    .with("chat_id", chat_id)
                    .with("error", error),
            )
            .await;
    }
}

fn message(chat_id: i64, message_id: i32) -> MessageRef {
    MessageRef {
        chat_id,
        message_id,
    }
}
