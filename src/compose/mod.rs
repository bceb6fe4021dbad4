//! Broadcast composer: the per-operator state machine behind `/sendall`.
//!
//! The machine is pure. [`Composer::handle`] takes an [`Input`], updates the
//! draft and state, and returns the [`Effect`]s the driver must perform
//! against the transport. Results the machine needs back (preview message ids,
//! render failures, the broadcast outcome) are fed in through the dedicated
//! feedback methods.

pub mod driver;
pub mod session;
pub mod ui;

use std::collections::BTreeMap;

use crate::fanout::BroadcastReport;
use crate::markup::sanitize;
use crate::message::{ImageSource, MessageSegment};

pub use driver::{ComposerDriver, DriverOutcome};
pub use session::{Session, SessionStore};

/// Stable identifier of a draft entry.
pub type EntryId = u32;

/// How newly added content is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    /// Content is sanitized and sent as HTML.
    Rich,
    /// Content is sent as literal text.
    Plain,
}

impl FormatMode {
    fn toggled(self) -> Self {
        match self {
            Self::Rich => Self::Plain,
            Self::Plain => Self::Rich,
        }
    }
}

/// One message of the draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftEntry {
    /// Entry id, unique within the draft.
    pub id: EntryId,
    /// The content.
    pub segment: MessageSegment,
    /// The transport rejected this entry's markup.
    pub had_error: bool,
}

/// Ordered operator content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    entries: Vec<DraftEntry>,
    mode: FormatMode,
    next_id: EntryId,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            mode: FormatMode::Plain,
            next_id: 0,
        }
    }
}

impl Draft {
    /// Entries in send order.
    pub fn entries(&self) -> &[DraftEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the draft has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current format mode.
    pub fn mode(&self) -> FormatMode {
        self.mode
    }

    /// Whether any entry failed to render.
    pub fn had_error(&self) -> bool {
        self.entries.iter().any(|e| e.had_error)
    }

    /// Look up an entry.
    pub fn get(&self, id: EntryId) -> Option<&DraftEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Segments in send order.
    pub fn segments(&self) -> Vec<MessageSegment> {
        self.entries.iter().map(|e| e.segment.clone()).collect()
    }

    fn push(&mut self, segment: MessageSegment) -> EntryId {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.entries.push(DraftEntry {
            id,
            segment,
            had_error: false,
        });
        id
    }

    fn get_mut(&mut self, id: EntryId) -> Option<&mut DraftEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    fn remove(&mut self, id: EntryId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    /// Text content in the current mode.
    fn text_segment(&self, text: &str) -> MessageSegment {
        match self.mode {
            FormatMode::Rich => MessageSegment::text(sanitize(text, false).into_string(), true),
            FormatMode::Plain => MessageSegment::text(text, false),
        }
    }

    /// Caption markup in the current mode.
    fn caption(&self, caption: &str) -> (String, bool) {
        match self.mode {
            FormatMode::Rich => (sanitize(caption, false).into_string(), true),
            FormatMode::Plain => (caption.to_owned(), false),
        }
    }

    fn photo_segment(&self, file_id: &str, caption: Option<&str>) -> MessageSegment {
        let (caption, formatted) = self.caption(caption.unwrap_or_default());
        MessageSegment::Image {
            source: ImageSource::FileId(file_id.to_owned()),
            caption,
            formatted,
            link_url: None,
        }
    }
}

/// Machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerState {
    /// Collecting content.
    Add,
    /// Waiting for replacement content for `target`.
    Edit {
        /// Entry being edited.
        target: EntryId,
        /// Preview message the edit control was pressed on.
        preview: i32,
        /// Only the caption of an image entry is replaced.
        caption_only: bool,
    },
    /// Waiting for the operator to confirm deleting `target`.
    DeleteConfirm {
        /// Entry to delete.
        target: EntryId,
        /// Its preview message.
        preview: i32,
    },
    /// Waiting for the operator to confirm the broadcast.
    SendConfirm,
    /// Terminal.
    Done,
}

/// Operator input, already decoded from transport events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Free text.
    Text(String),
    /// A photo with an optional caption.
    Photo {
        /// Transport file id of the largest size.
        file_id: String,
        /// Caption text.
        caption: Option<String>,
    },
    /// Flip rich/plain mode.
    ToggleFormat,
    /// Render the draft.
    Preview,
    /// Ask to broadcast.
    Send,
    /// Abort the current step (or the session from `Add`).
    Cancel,
    /// Edit control pressed on a preview message.
    EditControl {
        /// Preview message id.
        preview: i32,
        /// Caption-only edit.
        caption_only: bool,
    },
    /// Delete control pressed on a preview message.
    DeleteControl {
        /// Preview message id.
        preview: i32,
    },
    /// Positive confirmation.
    ConfirmYes,
    /// Negative confirmation.
    ConfirmNo,
    /// Anything else (stickers, stale buttons).
    Unsupported,
}

/// Informational prompt shown to the operator; the driver renders it with
/// the keyboard matching the state at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Session started.
    Started,
    /// Content added.
    Added {
        /// The content was a photo.
        photo: bool,
    },
    /// Format mode flipped.
    ModeChanged,
    /// Preview rendered; wording depends on render failures.
    AfterPreview,
    /// Waiting for replacement content.
    Editing {
        /// Caption-only edit.
        caption_only: bool,
    },
    /// Entry replaced; wording depends on render failures.
    AfterEdit,
    /// Back to adding without changes.
    Resumed,
    /// Delete confirmation pending.
    Deleting,
    /// Entry deleted.
    Deleted,
    /// Broadcast confirmation pending.
    ConfirmSend {
        /// Entries to be sent.
        count: usize,
    },
    /// Some entry is flagged; nothing can be sent until it is fixed.
    FixErrors,
    /// The canary rejected entry `index`.
    CanaryRejected {
        /// 0-based entry position.
        index: usize,
        /// Transport reason.
        reason: String,
    },
    /// Broadcast completed.
    Sent {
        /// Destinations that received everything.
        delivered: usize,
        /// Destinations attempted.
        attempted: usize,
    },
    /// Session cancelled.
    Cancelled,
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Replace the previous prompt with this one.
    Prompt(Prompt),
    /// Strip the controls of `stale` preview messages, then render every
    /// entry as a preview message with controls, reporting ids back through
    /// [`Composer::record_preview`] and failures through
    /// [`Composer::mark_render_failed`].
    RenderPreview {
        /// Preview messages of the previous preview.
        stale: Vec<i32>,
    },
    /// Re-render one preview message after its entry changed.
    UpdatePreview {
        /// Preview message id.
        preview: i32,
        /// Edited entry.
        entry: EntryId,
        /// The old content was an image.
        was_image: bool,
        /// Only the caption changed.
        caption_only: bool,
    },
    /// Replace a preview message's controls with a delete confirmation.
    AskDeleteConfirm {
        /// Preview message id.
        preview: i32,
    },
    /// Put the edit/delete controls back on a preview message.
    RestorePreviewControls {
        /// Preview message id.
        preview: i32,
        /// The entry is an image.
        is_image: bool,
    },
    /// Collapse the preview message of a deleted entry.
    CollapsePreview {
        /// Preview message id.
        preview: i32,
        /// The deleted entry was an image.
        is_image: bool,
    },
    /// Remove the controls from these preview messages.
    ClearPreviewControls {
        /// Preview message ids.
        previews: Vec<i32>,
    },
    /// Deliver the draft: canary first, then every destination. Report back
    /// through [`Composer::canary_rejected`] or
    /// [`Composer::broadcast_finished`].
    Broadcast {
        /// Draft content in order.
        segments: Vec<MessageSegment>,
    },
    /// Short acknowledgement for a button press.
    Notice {
        /// Text.
        text: String,
        /// Show as a modal alert.
        alert: bool,
    },
    /// The input is not valid here; nothing changed.
    Unknown,
}

/// One operator's composer: state, draft, and preview map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composer {
    state: ComposerState,
    draft: Draft,
    /// Preview message id to the entry it renders.
    previews: BTreeMap<i32, EntryId>,
}

impl Default for Composer {
    fn default() -> Self {
        Self::new()
    }
}

impl Composer {
    /// Fresh machine in `Add` with an empty draft.
    pub fn new() -> Self {
        Self {
            state: ComposerState::Add,
            draft: Draft::default(),
            previews: BTreeMap::new(),
        }
    }

    /// Effects for a freshly started session.
    pub fn start(&self) -> Vec<Effect> {
        vec![Effect::Prompt(Prompt::Started)]
    }

    /// Current state.
    pub fn state(&self) -> ComposerState {
        self.state
    }

    /// The draft.
    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    /// Entry rendered by preview message `preview`.
    pub fn preview_target(&self, preview: i32) -> Option<EntryId> {
        self.previews.get(&preview).copied()
    }

    /// Preview message ids currently mapped.
    pub fn preview_ids(&self) -> Vec<i32> {
        self.previews.keys().copied().collect()
    }

    /// Whether the machine reached `Done`.
    pub fn is_done(&self) -> bool {
        self.state == ComposerState::Done
    }

    /// Apply one input.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        match self.state {
            ComposerState::Add => self.on_add(input),
            ComposerState::Edit {
                target,
                preview,
                caption_only,
            } => self.on_edit(input, target, preview, caption_only),
            ComposerState::DeleteConfirm { target, preview } => {
                self.on_delete_confirm(input, target, preview)
            }
            ComposerState::SendConfirm => self.on_send_confirm(input),
            ComposerState::Done => vec![Effect::Unknown],
        }
    }

    fn on_add(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Text(text) => {
                let segment = self.draft.text_segment(&text);
                self.draft.push(segment);
                vec![Effect::Prompt(Prompt::Added { photo: false })]
            }
            Input::Photo { file_id, caption } => {
                let segment = self.draft.photo_segment(&file_id, caption.as_deref());
                self.draft.push(segment);
                vec![Effect::Prompt(Prompt::Added { photo: true })]
            }
            Input::ToggleFormat => {
                self.draft.mode = self.draft.mode.toggled();
                vec![Effect::Prompt(Prompt::ModeChanged)]
            }
            Input::Preview if !self.draft.is_empty() => {
                let stale = self.preview_ids();
                self.previews.clear();
                // The new render decides which entries are still broken.
                for entry in &mut self.draft.entries {
                    entry.had_error = false;
                }
                vec![
                    Effect::RenderPreview { stale },
                    Effect::Prompt(Prompt::AfterPreview),
                ]
            }
            Input::Send if !self.draft.is_empty() => {
                if self.draft.had_error() {
                    return vec![Effect::Prompt(Prompt::FixErrors)];
                }
                self.state = ComposerState::SendConfirm;
                vec![Effect::Prompt(Prompt::ConfirmSend {
                    count: self.draft.len(),
                })]
            }
            Input::Cancel => self.finish(Prompt::Cancelled),
            Input::EditControl {
                preview,
                caption_only,
            } => match self.preview_target(preview) {
                Some(target) => {
                    self.state = ComposerState::Edit {
                        target,
                        preview,
                        caption_only,
                    };
                    vec![Effect::Prompt(Prompt::Editing { caption_only })]
                }
                None => vec![Effect::Unknown],
            },
            Input::DeleteControl { preview } => match self.preview_target(preview) {
                Some(target) => {
                    self.state = ComposerState::DeleteConfirm { target, preview };
                    vec![
                        Effect::AskDeleteConfirm { preview },
                        Effect::Prompt(Prompt::Deleting),
                    ]
                }
                None => vec![Effect::Unknown],
            },
            _ => vec![Effect::Unknown],
        }
    }

    fn on_edit(
        &mut self,
        input: Input,
        target: EntryId,
        preview: i32,
        caption_only: bool,
    ) -> Vec<Effect> {
        let Some(old) = self.draft.get(target).map(|e| e.segment.clone()) else {
            self.state = ComposerState::Add;
            return vec![Effect::Unknown];
        };
        let was_image = old.is_image();
        let (segment, caption_changed) = match input {
            Input::Cancel => {
                self.state = ComposerState::Add;
                return vec![Effect::Prompt(Prompt::Resumed)];
            }
            Input::ToggleFormat => {
                self.draft.mode = self.draft.mode.toggled();
                return vec![Effect::Prompt(Prompt::ModeChanged)];
            }
            Input::Text(text) => match old {
                MessageSegment::Image {
                    source, link_url, ..
                } if caption_only => {
                    let (caption, formatted) = self.draft.caption(&text);
                    let segment = MessageSegment::Image {
                        source,
                        caption,
                        formatted,
                        link_url,
                    };
                    (segment, true)
                }
                _ => (self.draft.text_segment(&text), false),
            },
            Input::Photo { file_id, caption } => {
                (self.draft.photo_segment(&file_id, caption.as_deref()), false)
            }
            _ => return vec![Effect::Unknown],
        };

        if let Some(entry) = self.draft.get_mut(target) {
            entry.segment = segment;
            entry.had_error = false;
        }
        self.state = ComposerState::Add;
        vec![
            Effect::UpdatePreview {
                preview,
                entry: target,
                was_image,
                caption_only: caption_changed,
            },
            Effect::Prompt(Prompt::AfterEdit),
        ]
    }

    fn on_delete_confirm(&mut self, input: Input, target: EntryId, preview: i32) -> Vec<Effect> {
        match input {
            Input::ConfirmYes => {
                let is_image = self
                    .draft
                    .get(target)
                    .is_some_and(|e| e.segment.is_image());
                self.draft.remove(target);
                self.previews.remove(&preview);
                self.state = ComposerState::Add;
                vec![
                    Effect::Notice {
                        text: ui::DELETED_NOTICE.to_owned(),
                        alert: false,
                    },
                    Effect::CollapsePreview { preview, is_image },
                    Effect::Prompt(Prompt::Deleted),
                ]
            }
            Input::ConfirmNo => {
                self.state = ComposerState::Add;
                let is_image = self
                    .draft
                    .get(target)
                    .is_some_and(|e| e.segment.is_image());
                vec![
                    Effect::Notice {
                        text: ui::CANCELED_NOTICE.to_owned(),
                        alert: false,
                    },
                    Effect::RestorePreviewControls { preview, is_image },
                    Effect::Prompt(Prompt::Resumed),
                ]
            }
            _ => vec![Effect::Unknown],
        }
    }

    fn on_send_confirm(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::ConfirmYes => vec![
                Effect::Notice {
                    text: ui::SENDING_NOTICE.to_owned(),
                    alert: true,
                },
                Effect::Broadcast {
                    segments: self.draft.segments(),
                },
            ],
            Input::ConfirmNo => {
                self.state = ComposerState::Add;
                vec![Effect::Prompt(Prompt::Resumed)]
            }
            _ => vec![Effect::Unknown],
        }
    }

    fn finish(&mut self, prompt: Prompt) -> Vec<Effect> {
        let previews = self.preview_ids();
        self.previews.clear();
        self.draft.clear();
        self.state = ComposerState::Done;
        vec![
            Effect::ClearPreviewControls { previews },
            Effect::Prompt(prompt),
        ]
    }

    // ── Feedback from the driver ───────────────────────────────

    /// Map a rendered preview message to its entry.
    pub fn record_preview(&mut self, preview: i32, entry: EntryId) {
        self.previews.insert(preview, entry);
    }

    /// Flag an entry whose markup the transport rejected.
    pub fn mark_render_failed(&mut self, entry: EntryId) {
        if let Some(e) = self.draft.get_mut(entry) {
            e.had_error = true;
        }
    }

    /// The canary rejected entry `index`: flag it and return to `Add`.
    pub fn canary_rejected(&mut self, index: usize, reason: &str) -> Vec<Effect> {
        if let Some(entry) = self.draft.entries.get_mut(index) {
            entry.had_error = true;
        }
        self.state = ComposerState::Add;
        vec![Effect::Prompt(Prompt::CanaryRejected {
            index,
            reason: reason.to_owned(),
        })]
    }

    /// The broadcast went out: clear the draft and finish.
    pub fn broadcast_finished(&mut self, report: &BroadcastReport) -> Vec<Effect> {
        self.finish(Prompt::Sent {
            delivered: report.delivered,
            attempted: report.attempted,
        })
    }
}
