pub const SENDER_UNKNOWN: &str = "Failed to find the sender of this message";
pub const NO_PERM: &str = "*You're not supposed to do that*";

pub const WELCOME: &str = "Welcome to the Budapest catalog!";
pub const CATALOG_HEADER: &str = "📂 <b>Service catalog</b>";
pub const CATALOG_EMPTY: &str = "The catalog is empty for now";
pub const FIND_USAGE: &str = "Usage: /find <catalog number>";
pub const NUMBER_UNKNOWN: &str = "No post carries that catalog number";

pub const UIDS_EXHAUSTED: &str = "No free UID left, please contact the admins";
pub const NUMBERS_EXHAUSTED: &str = "No free catalog number left, please contact the admins";

pub const RATING_USAGE: &str =
    "Usage: reply to your photo with /gorateme name ; three short words ; girl|boy";
pub const PHOTO_REQUIRED: &str = "Reply to the photo you want on your card";
pub const GENDER_UNKNOWN: &str = "Pick a category: girl or boy";
pub const ABOUT_INVALID: &str = "That about line doesn't fit the format";
pub const RATING_SUBMITTED: &str = "Your application is in! Submission";
pub const RATING_COOLDOWN: &str = "You applied recently, try again in";
pub const TOP_HEADER: &str = "🏆 <b>TopPeople of Budapest</b>";
pub const TOP_EMPTY: &str = "The ranking is empty for now";

pub const VOTE_COUNTED: &str = "Vote counted:";
pub const VOTE_DUPLICATE: &str = "You already voted on this card";
pub const VOTE_OUT_OF_RANGE: &str = "That vote is out of range";
pub const VOTE_TARGET_GONE: &str = "This card is not open for voting";

pub const ADDPOST_USAGE: &str = "Usage: /addpost category ; name ; [description] ; [priority ad]";
pub const LISTING_CREATED: &str = "Listing created:";
pub const LISTING_DROPPED: &str = "Listing deactivated";
pub const PRIORITY_FULL: &str = "The priority pool is full";
pub const DROPPOST_USAGE: &str = "Usage: /droppost <catalog number>";

pub const APPROVE_USAGE: &str = "Usage: /approve <number> [published link]";
pub const REJECT_USAGE: &str = "Usage: /reject <number>";
pub const SUBMISSION_APPROVED: &str = "Approved submission";
pub const SUBMISSION_REJECTED: &str = "Rejected submission";
pub const SUBMISSION_UNKNOWN: &str = "No submission carries that number";
pub const ALREADY_DECIDED: &str = "That submission was already moderated";

pub const CHANGEUID_USAGE: &str = "Usage: /changeuid <current uid> <new uid>";
pub const UIDS_NUMERIC: &str = "UIDs must be numbers";
pub const UID_CHANGED: &str = "UID moved:";
pub const UID_UNKNOWN: &str = "No user holds that UID";
pub const UID_TAKEN: &str = "That UID is already taken";
pub const UID_OUT_OF_RANGE: &str = "New UID is outside the allowed range";

pub const BAN_USAGE: &str = "Usage: /ban <uid> (or /unban <uid>)";
pub const USER_BANNED: &str = "User banned";
pub const USER_UNBANNED: &str = "Ban lifted";

pub const STATS_HEADER: &str = "📊 <b>Bot statistics</b>";
