use std::{collections::HashMap, env::vars, sync::Arc};

use chrono::Utc;
use html_escape::encode_text;
use itertools::Itertools;
use log::{info, warn};
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema, Statement,
};
use teloxide::{
    dispatching2::UpdateFilterExt,
    prelude2::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, ReplyMarkup},
    utils::command::BotCommand,
};

mod catalog;
mod config;
mod cooldown;
mod model;
mod rating;
mod slots;
mod strings;
mod users;

use config::Config;

const BOT_NAME: &str = "budapest_catalog_bot";
const CMD_GORATEME: &str = "gorateme";

#[tokio::main]
async fn main() -> Result<(), BotError> {
    teloxide::enable_logging!();
    info!("Starting bot");

    let bot = Bot::from_env();

    // get db url from environment
    let db_url = vars()
        .collect::<HashMap<_, _>>()
        .get("DB_URL")
        .expect("DB_URL to be set")
        .clone();

    // connect to db
    let db = Database::connect(db_url).await?;

    // create tables if not exists
    create_table(model::user::Entity, &db).await?;
    create_table(model::catalog_post::Entity, &db).await?;
    create_table(model::rating_post::Entity, &db).await?;
    create_table(model::rating_vote::Entity, &db).await?;
    create_table(model::cooldown::Entity, &db).await?;
    ensure_unique_indexes(&db).await?;

    // setup handlers
    let cmd_handler = Update::filter_message()
        .filter_command::<Command>()
        .branch(dptree::endpoint(command_handler));
    let vote_handler =
        Update::filter_callback_query().branch(dptree::endpoint(vote_callback_handler));

    let handler = dptree::entry().branch(cmd_handler).branch(vote_handler);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![
            Arc::new(DataStore::new(db)),
            Arc::new(Config::from_env())
        ])
        .build()
        .setup_ctrlc_handler()
        .dispatch()
        .await;

    Ok(())
}

async fn create_table<E: EntityTrait>(entity: E, db: &DatabaseConnection) -> Result<(), BotError> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    db.execute(builder.build(schema.create_table_from_entity(entity).if_not_exists()))
        .await?;

    Ok(())
}

// Composite unique constraints the entity derive cannot express. These are
// the race-closing authority behind the in-memory duplicate checks.
async fn ensure_unique_indexes(db: &DatabaseConnection) -> Result<(), BotError> {
    let backend = db.get_database_backend();
    for sql in [
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_rating_votes_post_voter \
         ON rating_votes (rating_post_id, user_id)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_cooldowns_user_command \
         ON cooldowns (user_id, command)",
    ] {
        db.execute(Statement::from_string(backend, sql.to_owned()))
            .await?;
    }
    Ok(())
}

struct DataStore {
    db: DatabaseConnection,
}

impl DataStore {
    fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

async fn command_handler(
    bot: Bot,
    message: Message,
    store: Arc<DataStore>,
    config: Arc<Config>,
) -> Result<(), BotError> {
    let command = Command::parse(
        message.text().ok_or(BotError::CommandParseError(None))?,
        BOT_NAME,
    )?;

    let sender = match message.from() {
        Some(user) => user,
        None => {
            reply_msg(bot, message, strings::SENDER_UNKNOWN).await?;
            return Ok(());
        }
    };

    // every inbound command registers or refreshes the sender
    let profile = users::Profile {
        id: sender.id,
        username: sender.username.clone(),
        first_name: Some(sender.first_name.clone()),
    };
    let user = match users::touch(&store.db, &config, &profile, Utc::now()).await {
        Ok(user) => user,
        Err(users::RegisterError::UidsExhausted) => {
            reply_msg(bot, message, strings::UIDS_EXHAUSTED).await?;
            return Ok(());
        }
        Err(users::RegisterError::Db(e)) => return Err(e.into()),
    };
    if user.is_banned {
        info!("dropping command from banned user {}", user.id);
        return Ok(());
    }

    match command {
        Command::Start => {
            reply_msg(
                bot,
                message,
                format!("{} Your UID is {}.", strings::WELCOME, user.uid),
            )
            .await?;
        }
        Command::Catalog => {
            let page = slots::compose(&store.db, &config).await?;
            if page.is_empty() {
                reply_msg(bot, message, strings::CATALOG_EMPTY).await?;
                return Ok(());
            }
            let lines = page.iter().map(render_slot).join("\n\n");
            reply_msg_with_parse_mode(
                bot,
                message,
                Some(ParseMode::Html),
                format!("{}\n\n{lines}", strings::CATALOG_HEADER),
            )
            .await?;
        }
        Command::Find { text } => {
            let number: i32 = match text.trim().parse() {
                Ok(number) => number,
                Err(_) => {
                    reply_msg(bot, message, strings::FIND_USAGE).await?;
                    return Ok(());
                }
            };
            match catalog::find_by_number(&store.db, number).await? {
                None => reply_msg(bot, message, strings::NUMBER_UNKNOWN).await?,
                Some(catalog::Numbered::Listing(post)) => {
                    catalog::record_click(&store.db, post.id).await?;
                    reply_msg_with_parse_mode(
                        bot,
                        message,
                        Some(ParseMode::Html),
                        render_listing(&post),
                    )
                    .await?;
                }
                Some(catalog::Numbered::Ranked(post)) => {
                    let keyboard = (post.status == rating::STATUS_APPROVED)
                        .then(|| vote_keyboard(post.id, &config));
                    let mut send = bot.send_message(message.chat.id, render_card(&post));
                    send.reply_to_message_id = Some(message.id);
                    send.parse_mode = Some(ParseMode::Html);
                    send.reply_markup = keyboard.map(ReplyMarkup::InlineKeyboard);
                    send.send().await?;
                }
            }
        }
        Command::GoRateMe { text } => {
            match cooldown::check(&store.db, user.id, CMD_GORATEME, Utc::now()).await? {
                cooldown::Verdict::Cooling { seconds_left } => {
                    let hours = seconds_left / 3600;
                    let minutes = (seconds_left % 3600) / 60;
                    reply_msg(
                        bot,
                        message,
                        format!("{} {hours}h {minutes}m", strings::RATING_COOLDOWN),
                    )
                    .await?;
                    return Ok(());
                }
                cooldown::Verdict::Ready => {}
            }

            // the card photo rides on the replied-to message
            let photo = message
                .reply_to_message()
                .and_then(|replied| replied.photo())
                .and_then(|sizes| sizes.last())
                .map(|size| size.file_id.clone());
            let photo = match photo {
                Some(photo) => photo,
                None => {
                    reply_msg(bot, message, strings::PHOTO_REQUIRED).await?;
                    return Ok(());
                }
            };

            let parts: Vec<&str> = text.split(';').map(str::trim).collect();
            if parts.len() != 3 {
                reply_msg(bot, message, strings::RATING_USAGE).await?;
                return Ok(());
            }
            let gender = match rating::Gender::parse(parts[2]) {
                Some(gender) => gender,
                None => {
                    reply_msg(bot, message, strings::GENDER_UNKNOWN).await?;
                    return Ok(());
                }
            };

            let submission = rating::Submission {
                name: parts[0].to_string(),
                about: parts[1].to_string(),
                gender,
                media_file_id: photo,
                author_user_id: user.id,
                author_username: user.username.clone(),
            };
            match rating::submit(&store.db, &config, &submission, Utc::now()).await {
                Ok(post) => {
                    cooldown::arm(&store.db, &config, user.id, CMD_GORATEME, Utc::now()).await?;
                    reply_msg(
                        bot,
                        message,
                        format!("{} #{:04}", strings::RATING_SUBMITTED, post.catalog_number),
                    )
                    .await?;
                }
                Err(rating::SubmitError::InvalidAbout(reason)) => {
                    reply_msg(
                        bot,
                        message,
                        format!("{} ({reason})", strings::ABOUT_INVALID),
                    )
                    .await?;
                }
                Err(rating::SubmitError::NumbersExhausted) => {
                    reply_msg(bot, message, strings::NUMBERS_EXHAUSTED).await?;
                }
                Err(rating::SubmitError::Db(e)) => return Err(e.into()),
            }
        }
        Command::Top { text } => {
            let gender = rating::Gender::parse(&text);
            let posts = rating::top_ranked(&store.db, gender, 10).await?;
            if posts.is_empty() {
                reply_msg(bot, message, strings::TOP_EMPTY).await?;
                return Ok(());
            }
            let lines = posts
                .iter()
                .enumerate()
                .map(|(place, post)| {
                    let medal = match place {
                        0 => "🥇".to_string(),
                        1 => "🥈".to_string(),
                        2 => "🥉".to_string(),
                        place => format!("{}.", place + 1),
                    };
                    format!(
                        "{medal} <b>{}</b> — {} ({:+}, {} votes)",
                        encode_text(&post.name),
                        encode_text(&post.about),
                        post.total_score,
                        post.vote_count
                    )
                })
                .join("\n");
            reply_msg_with_parse_mode(
                bot,
                message,
                Some(ParseMode::Html),
                format!("{}\n\n{lines}", strings::TOP_HEADER),
            )
            .await?;
        }
        Command::AddPost { text } => {
            if !is_admin(&config, &user) {
                reply_msg(bot, message, strings::NO_PERM).await?;
                return Ok(());
            }
            let parts: Vec<&str> = text.split(';').map(str::trim).collect();
            if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
                reply_msg(bot, message, strings::ADDPOST_USAGE).await?;
                return Ok(());
            }
            let flags = parts.get(3).copied().unwrap_or("");
            let new = catalog::NewListing {
                user_id: user.id,
                category: parts[0].to_string(),
                name: parts[1].to_string(),
                description: parts
                    .get(2)
                    .filter(|description| !description.is_empty())
                    .map(|description| description.to_string()),
                media_file_id: message
                    .reply_to_message()
                    .and_then(|replied| replied.photo())
                    .and_then(|sizes| sizes.last())
                    .map(|size| size.file_id.clone()),
                is_priority: flags.contains("priority"),
                is_ad: flags.contains("ad"),
            };
            match catalog::create_listing(&store.db, &config, &new, Utc::now()).await {
                Ok(post) => {
                    reply_msg(
                        bot,
                        message,
                        format!("{} #{:04}", strings::LISTING_CREATED, post.catalog_number),
                    )
                    .await?;
                }
                Err(catalog::CatalogError::NumbersExhausted) => {
                    reply_msg(bot, message, strings::NUMBERS_EXHAUSTED).await?;
                }
                Err(catalog::CatalogError::PriorityFull(max)) => {
                    reply_msg(
                        bot,
                        message,
                        format!("{} (max {max})", strings::PRIORITY_FULL),
                    )
                    .await?;
                }
                Err(catalog::CatalogError::Db(e)) => return Err(e.into()),
            }
        }
        Command::DropPost { text } => {
            if !is_admin(&config, &user) {
                reply_msg(bot, message, strings::NO_PERM).await?;
                return Ok(());
            }
            let number: i32 = match text.trim().parse() {
                Ok(number) => number,
                Err(_) => {
                    reply_msg(bot, message, strings::DROPPOST_USAGE).await?;
                    return Ok(());
                }
            };
            match catalog::deactivate(&store.db, number).await? {
                Some(_) => reply_msg(bot, message, strings::LISTING_DROPPED).await?,
                None => reply_msg(bot, message, strings::NUMBER_UNKNOWN).await?,
            }
        }
        Command::Approve { text } => {
            if !is_moderator(&config, &user) {
                reply_msg(bot, message, strings::NO_PERM).await?;
                return Ok(());
            }
            let args = text.trim().split_whitespace().collect_vec();
            let number: i32 = match args.first().and_then(|raw| raw.parse().ok()) {
                Some(number) => number,
                None => {
                    reply_msg(bot, message, strings::APPROVE_USAGE).await?;
                    return Ok(());
                }
            };
            let link = args.get(1).map(|link| link.to_string());
            match rating::approve(&store.db, number, link).await {
                Ok(post) => {
                    reply_msg(
                        bot,
                        message,
                        format!(
                            "{} #{:04}",
                            strings::SUBMISSION_APPROVED,
                            post.catalog_number
                        ),
                    )
                    .await?;
                }
                Err(err) => reply_moderation_error(bot, message, err).await?,
            }
        }
        Command::Reject { text } => {
            if !is_moderator(&config, &user) {
                reply_msg(bot, message, strings::NO_PERM).await?;
                return Ok(());
            }
            let number: i32 = match text.trim().parse() {
                Ok(number) => number,
                Err(_) => {
                    reply_msg(bot, message, strings::REJECT_USAGE).await?;
                    return Ok(());
                }
            };
            match rating::reject(&store.db, number).await {
                Ok(post) => {
                    reply_msg(
                        bot,
                        message,
                        format!(
                            "{} #{:04}",
                            strings::SUBMISSION_REJECTED,
                            post.catalog_number
                        ),
                    )
                    .await?;
                }
                Err(err) => reply_moderation_error(bot, message, err).await?,
            }
        }
        Command::ChangeUid { text } => {
            if !is_admin(&config, &user) {
                reply_msg(bot, message, strings::NO_PERM).await?;
                return Ok(());
            }
            let args = text.trim().split_whitespace().collect_vec();
            if args.len() != 2 {
                reply_msg(bot, message, strings::CHANGEUID_USAGE).await?;
                return Ok(());
            }
            let (current, new) = match (args[0].parse::<i32>(), args[1].parse::<i32>()) {
                (Ok(current), Ok(new)) => (current, new),
                _ => {
                    reply_msg(bot, message, strings::UIDS_NUMERIC).await?;
                    return Ok(());
                }
            };
            match users::reassign(&store.db, &config, current, new).await {
                Ok(_) => {
                    reply_msg(
                        bot,
                        message,
                        format!("{} {current} -> {new}", strings::UID_CHANGED),
                    )
                    .await?;
                }
                Err(users::ReassignError::OutOfRange { min, max }) => {
                    reply_msg(
                        bot,
                        message,
                        format!("{} ({min}-{max})", strings::UID_OUT_OF_RANGE),
                    )
                    .await?;
                }
                Err(users::ReassignError::NotFound(_)) => {
                    reply_msg(bot, message, strings::UID_UNKNOWN).await?;
                }
                Err(users::ReassignError::Taken(_)) => {
                    reply_msg(bot, message, strings::UID_TAKEN).await?;
                }
                Err(users::ReassignError::Db(e)) => return Err(e.into()),
            }
        }
        Command::Ban { text } => {
            if !is_admin(&config, &user) {
                reply_msg(bot, message, strings::NO_PERM).await?;
                return Ok(());
            }
            match text.trim().parse::<i32>() {
                Ok(uid) => match users::set_banned(&store.db, uid, true).await? {
                    Some(_) => reply_msg(bot, message, strings::USER_BANNED).await?,
                    None => reply_msg(bot, message, strings::UID_UNKNOWN).await?,
                },
                Err(_) => reply_msg(bot, message, strings::BAN_USAGE).await?,
            }
        }
        Command::Unban { text } => {
            if !is_admin(&config, &user) {
                reply_msg(bot, message, strings::NO_PERM).await?;
                return Ok(());
            }
            match text.trim().parse::<i32>() {
                Ok(uid) => match users::set_banned(&store.db, uid, false).await? {
                    Some(_) => reply_msg(bot, message, strings::USER_UNBANNED).await?,
                    None => reply_msg(bot, message, strings::UID_UNKNOWN).await?,
                },
                Err(_) => reply_msg(bot, message, strings::BAN_USAGE).await?,
            }
        }
        Command::Stats => {
            if !is_admin(&config, &user) {
                reply_msg(bot, message, strings::NO_PERM).await?;
                return Ok(());
            }
            let total_users = users::count(&store.db).await?;
            let active_listings = catalog::count_active(&store.db).await?;
            let approved_cards = rating::count_approved(&store.db).await?;
            let votes = rating::count_votes(&store.db).await?;
            reply_msg_with_parse_mode(
                bot,
                message,
                Some(ParseMode::Html),
                format!(
                    "{}\n\nUsers: {total_users}\nActive listings: {active_listings}\n\
                     Approved cards: {approved_cards}\nVotes: {votes}",
                    strings::STATS_HEADER
                ),
            )
            .await?;
        }
        Command::Help => {
            reply_msg(bot, message, Command::descriptions()).await?;
        }
    }
    Ok(())
}

async fn vote_callback_handler(
    bot: Bot,
    query: CallbackQuery,
    store: Arc<DataStore>,
    config: Arc<Config>,
) -> Result<(), BotError> {
    let data = match query.data.clone() {
        Some(data) => data,
        None => return Ok(()),
    };
    let parts = data.split(':').collect_vec();
    if parts.len() != 3 || parts[0] != "vote" {
        warn!("unexpected callback payload: {data}");
        return Ok(());
    }
    let (post_id, value) = match (parts[1].parse::<i32>(), parts[2].parse::<i32>()) {
        (Ok(post_id), Ok(value)) => (post_id, value),
        _ => {
            warn!("malformed vote payload: {data}");
            return Ok(());
        }
    };

    let profile = users::Profile {
        id: query.from.id,
        username: query.from.username.clone(),
        first_name: Some(query.from.first_name.clone()),
    };
    let voter = match users::touch(&store.db, &config, &profile, Utc::now()).await {
        Ok(user) => user,
        Err(users::RegisterError::UidsExhausted) => return Ok(()),
        Err(users::RegisterError::Db(e)) => return Err(e.into()),
    };
    if voter.is_banned {
        return Ok(());
    }

    let text = match rating::vote(&store.db, &config, post_id, voter.id, value, Utc::now()).await
    {
        Ok(receipt) => format!(
            "{} {:+} (score {:+})",
            strings::VOTE_COUNTED,
            receipt.value,
            receipt.total_score
        ),
        Err(rating::VoteError::Duplicate) => strings::VOTE_DUPLICATE.to_string(),
        Err(rating::VoteError::InvalidMagnitude { min, max }) => {
            format!("{} ({min}..{max})", strings::VOTE_OUT_OF_RANGE)
        }
        Err(rating::VoteError::PostNotFound) | Err(rating::VoteError::NotApproved) => {
            strings::VOTE_TARGET_GONE.to_string()
        }
        Err(rating::VoteError::Db(e)) => return Err(e.into()),
    };

    let mut answer = bot.answer_callback_query(query.id);
    answer.text = Some(text);
    answer.show_alert = Some(true);
    answer.send().await?;
    Ok(())
}

fn is_admin(config: &Config, user: &model::user::Model) -> bool {
    config.is_admin(user.id) || user.is_admin
}

fn is_moderator(config: &Config, user: &model::user::Model) -> bool {
    is_admin(config, user) || user.is_moderator
}

fn vote_keyboard(post_id: i32, config: &Config) -> InlineKeyboardMarkup {
    let buttons: Vec<InlineKeyboardButton> = (config.min_vote..=config.max_vote)
        .filter(|value| *value != 0)
        .map(|value| {
            InlineKeyboardButton::callback(format!("{value:+}"), format!("vote:{post_id}:{value}"))
        })
        .collect();
    InlineKeyboardMarkup::new([buttons])
}

fn render_slot(slot: &slots::Slot) -> String {
    match slot {
        slots::Slot::Listing(post) => render_listing(post),
        slots::Slot::Ranked(post) => render_card(post),
    }
}

fn render_listing(post: &model::catalog_post::Model) -> String {
    let description = post
        .description
        .as_deref()
        .map(|description| format!("\n{}", encode_text(description)))
        .unwrap_or_default();
    format!(
        "<b>#{:04}</b> [{}] {}{description}",
        post.catalog_number,
        encode_text(&post.category),
        encode_text(&post.name)
    )
}

fn render_card(post: &model::rating_post::Model) -> String {
    format!(
        "⭐ <b>#{:04}</b> {} — {} ({:+}, {} votes)",
        post.catalog_number,
        encode_text(&post.name),
        encode_text(&post.about),
        post.total_score,
        post.vote_count
    )
}

async fn reply_moderation_error(
    bot: Bot,
    message: Message,
    err: rating::ModerationError,
) -> Result<(), BotError> {
    match err {
        rating::ModerationError::NotFound(_) => {
            reply_msg(bot, message, strings::SUBMISSION_UNKNOWN).await
        }
        rating::ModerationError::AlreadyDecided { status, .. } => {
            reply_msg(
                bot,
                message,
                format!("{} ({status})", strings::ALREADY_DECIDED),
            )
            .await
        }
        rating::ModerationError::Db(e) => Err(e.into()),
    }
}

async fn reply_msg<S: AsRef<str>>(bot: Bot, message: Message, text: S) -> Result<(), BotError> {
    reply_msg_with_parse_mode(bot, message, None, text).await?;
    Ok(())
}

async fn reply_msg_with_parse_mode<S: AsRef<str>>(
    bot: Bot,
    message: Message,
    parse_mode: Option<ParseMode>,
    text: S,
) -> Result<(), BotError> {
    let mut send_message = bot.send_message(message.chat.id, text.as_ref());
    send_message.reply_to_message_id = Some(message.id);
    send_message.parse_mode = parse_mode;
    send_message.send().await?;
    Ok(())
}

#[derive(BotCommand, Debug)]
#[command(rename = "lowercase", description = "Commands:")]
enum Command {
    #[command(description = "register and show your UID")]
    Start,

    #[command(description = "browse the service catalog")]
    Catalog,

    #[command(description = "look up a catalog number")]
    Find { text: String },

    #[command(description = "apply to TopPeople: reply to your photo")]
    GoRateMe { text: String },

    #[command(description = "show the TopPeople ranking")]
    Top { text: String },

    #[command(description = "add a service listing (admin)")]
    AddPost { text: String },

    #[command(description = "deactivate a listing (admin)")]
    DropPost { text: String },

    #[command(description = "approve a submission (moderator)")]
    Approve { text: String },

    #[command(description = "reject a submission (moderator)")]
    Reject { text: String },

    #[command(description = "move a UID (admin)")]
    ChangeUid { text: String },

    #[command(description = "ban by UID (admin)")]
    Ban { text: String },

    #[command(description = "lift a ban (admin)")]
    Unban { text: String },

    #[command(description = "usage numbers (admin)")]
    Stats,

    #[command(description = "get help message")]
    Help,
}

#[derive(Debug)]
enum BotError {
    /// Problem originated from the Telegram bot library
    RequestError(teloxide::RequestError),

    /// Command parsing error
    CommandParseError(Option<teloxide::utils::command::ParseError>),

    /// Problem originated from the database library
    DatabaseError(Option<sea_orm::DbErr>),
}

impl From<teloxide::RequestError> for BotError {
    fn from(e: teloxide::RequestError) -> Self {
        Self::RequestError(e)
    }
}

impl From<teloxide::utils::command::ParseError> for BotError {
    fn from(e: teloxide::utils::command::ParseError) -> Self {
        Self::CommandParseError(Some(e))
    }
}

impl From<sea_orm::DbErr> for BotError {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::DatabaseError(Some(e))
    }
}

impl std::fmt::Display for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestError(e) => write!(f, "{:?}", e),
            Self::CommandParseError(Some(e)) => write!(f, "{:?}", e),
            Self::CommandParseError(None) => write!(f, "CommandParseError"),
            Self::DatabaseError(Some(e)) => write!(f, "{:?}", e),
            Self::DatabaseError(None) => write!(f, "DatabaseError"),
        }
    }
}

impl std::error::Error for BotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RequestError(e) => Some(e),
            Self::CommandParseError(Some(e)) => Some(e),
            Self::DatabaseError(Some(e)) => Some(e),
            _ => None,
        }
    }
}
