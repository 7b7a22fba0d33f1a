// Tapback and sticker application.

use crate::model::{MessageItem, MessageModifier, Sticker, StickerItem, Tapback, TapbackItem};
use crate::notify::SoundCue;

use super::AppCore;

/// iMessage allows one reaction per sender per message part: an addition
/// replaces whatever that sender had on the part, a removal deletes the
/// matching reaction only.
pub(super) fn apply_tapback(message: &mut MessageItem, tapback: &TapbackItem) -> bool {
    let same_slot = |t: &Tapback| t.sender == tapback.sender && t.message_index == tapback.message_index;
    if tapback.is_addition {
        match message.tapbacks.iter().position(same_slot) {
            Some(i) if message.tapbacks[i].tapback_type == tapback.tapback_type => false,
            Some(i) => {
                message.tapbacks[i].tapback_type = tapback.tapback_type;
                true
            }
            None => {
                message.tapbacks.push(Tapback {
                    sender: tapback.sender.clone(),
                    tapback_type: tapback.tapback_type,
                    message_index: tapback.message_index,
                });
                true
            }
        }
    } else {
        let before = message.tapbacks.len();
        message
            .tapbacks
            .retain(|t| !(same_slot(t) && t.tapback_type == tapback.tapback_type));
        message.tapbacks.len() != before
    }
}

/// Stickers are keyed by their own guid; redelivery is a no-op.
pub(super) fn apply_sticker(message: &mut MessageItem, sticker: &StickerItem) -> bool {
    if message.stickers.iter().any(|s| s.guid == sticker.guid) {
        return false;
    }
    message.stickers.push(Sticker {
        guid: sticker.guid.clone(),
        message_index: sticker.message_index,
        sender: sticker.sender.clone(),
    });
    true
}

impl AppCore {
    pub(super) fn apply_modifiers(&mut self, modifiers: Vec<MessageModifier>) {
        if modifiers.is_empty() {
            return;
        }
        let mut timeline_changed = false;
        let mut fresh_additions: Vec<TapbackItem> = Vec::new();

        for modifier in modifiers {
            match modifier {
                MessageModifier::Tapback(tapback) => {
                    if !self.dedup.should_apply(&tapback) {
                        tracing::trace!(message_guid = %tapback.message_guid, "duplicate tapback ignored");
                        continue;
                    }
                    match self.timelines.message_mut(&tapback.message_guid) {
                        Some((_, message)) => timeline_changed |= apply_tapback(message, &tapback),
                        None => {
                            tracing::trace!(message_guid = %tapback.message_guid, "tapback target not loaded")
                        }
                    }
                    if tapback.is_addition && tapback.sender.is_some() {
                        fresh_additions.push(tapback);
                    }
                }
                MessageModifier::Sticker(sticker) => {
                    if let Some((_, message)) = self.timelines.message_mut(&sticker.message_guid) {
                        timeline_changed |= apply_sticker(message, &sticker);
                    }
                }
            }
        }

        // Tapback payloads carry no chat guid.
        let marked = self.search_cache.note_modifiers();
        let search_changed = marked > 0 && self.refresh_search_staleness();

        if self.state.interactive && !fresh_additions.is_empty() {
            tracing::debug!(count = fresh_additions.len(), "tapback sound");
            self.notifier.play_sound(SoundCue::TapbackArrived {
                tapbacks: fresh_additions,
            });
        }

        if timeline_changed || search_changed {
            self.emit_state();
        }
    }
}
