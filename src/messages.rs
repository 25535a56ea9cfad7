//! Fixed user-facing strings (English catalogue).
//!
//! The unrecognized-food reply is a contract: it must be surfaced
//! verbatim for every AI rejection or transport failure on that path.

pub const UNRECOGNIZED: &str = "I couldn't recognize the food. Please try sending it again.";
pub const THROTTLE: &str = "Too many requests. Please wait a bit and try again 🙂";
pub const SANITY_FAIL: &str = "⚠️ The values look unrealistic. Please double-check and try again.";
pub const PROCESSING_NEW: &str = "🔄 Combobulating...";
pub const PROCESSING_EDIT: &str = "🔄 Analysing again with your feedback...";
pub const MEAL_NOT_FOUND: &str = "Meal not found.";
pub const ALREADY_SAVED: &str = "Already saved.";
pub const DELETED_LABEL: &str = "🗑️ Deleted.";
pub const DRAFT_EXPIRED: &str = "This draft has expired. Please send your meal again.";

pub const PRECHECK_NOT_TEXT_OR_PHOTO: &str =
    "Please ✏️ write a food or drink or send me a 📸 photo.";
pub const PRECHECK_WATER: &str = "I can't analyse that because it seems to just say 'вода', \
     which means 'water'. Water doesn't contain calories or macros. 😀";
pub const PRECHECK_VAGUE: &str = "I can't analyse that because the text is not in English and \
     lacks sufficient detail about the food item to make an estimation 😀";
pub const PRECHECK_PHOTO_TOO_LARGE: &str =
    "The photo is too large. Please resend a clearer or smaller photo 📸";

pub const REMINDER_TEXT: &str = "Hey! You haven't logged any meals in a while. \
     Send me a photo or describe what you ate 🍽️";

pub fn edit_window_expired(hours: i64) -> String {
    format!("⏳ This meal can no longer be edited (older than {hours}h).")
}

pub fn delete_window_expired(hours: i64) -> String {
    format!("⏳ This meal can no longer be deleted (older than {hours}h).")
}
