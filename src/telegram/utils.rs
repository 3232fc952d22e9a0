use teloxide::{types::BotCommand, utils::command::BotCommands};

use crate::{
    domain::{canonical_link, user_link, Post, PostId, PostMedia, PostReference, UserId},
    telegram::types::GeneralCommand,
};

// Telegram counts caption length after entity parsing; keep well under 1024.
const TITLE_MAX_CHARS: usize = 200;
const AUTHOR_MAX_CHARS: usize = 100;
const LINK_MAX_CHARS: usize = 256;

pub fn escape_html(text: &str) -> String {
    html_escape::encode_text(text).into_owned()
}

pub fn status_text(post_id: PostId) -> String {
    format!("Downloading <code>{post_id}</code>…")
}

pub fn user_anchor(user_id: UserId) -> String {
    format!("<a href=\"{}\">{user_id}</a>", escape_html(&user_link(user_id)))
}

pub fn collecting_text(user_id: UserId) -> String {
    format!("Collecting the works of user {}…", user_anchor(user_id))
}

pub fn no_works_text(user_id: UserId) -> String {
    format!("User {} has no works to send.", user_anchor(user_id))
}

pub fn sending_works_text(user_id: UserId, total: usize) -> String {
    format!("Sending {total} works of user {}…", user_anchor(user_id))
}

pub fn works_sent_text(user_id: UserId, delivered: usize, total: usize) -> String {
    let user = user_anchor(user_id);
    if delivered == total {
        format!("All {total} works of user {user} have been sent.")
    } else {
        format!("{delivered} of {total} works of user {user} have been sent.")
    }
}

pub fn archive_caption(user_id: UserId, last_index: usize, total: usize) -> String {
    format!("{last_index}/{total} works of user {}", user_anchor(user_id))
}

pub fn build_caption(
    post: &Post,
    reference: &PostReference,
    position: Option<(usize, usize)>,
) -> String {
    let mut caption = String::new();
    if let Some((index, total)) = position {
        caption.push_str(&format!("{index}/{total} "));
    }
    caption.push_str(&format!(
        "<b>{}</b> by {}\n{}",
        escape_html(&truncate_chars(&post.title, TITLE_MAX_CHARS)),
        escape_html(&truncate_chars(&post.author, AUTHOR_MAX_CHARS)),
        escape_html(&caption_link(post, reference)),
    ));
    if let PostMedia::Video(ugoira) = &post.media {
        caption.push_str(&format!("\nUgoira: {} frames", ugoira.frame_delays.len()));
        if let Some(delay) = ugoira.mean_delay_ms() {
            caption.push_str(&format!(", ~{delay} ms per frame"));
        }
    }
    caption
}

pub fn greeting(bot_name: &str) -> String {
    let name = escape_html(bot_name);
    format!(
        "Hey, I'm {name}.\n\n\
         I download posts from <a href=\"https://www.pixiv.net/\">pixiv</a> for you.\n\
         Just send me a link or the id of a post and I'll give you the images or animations.\n\
         Several links or ids in one message work too.\n\
         Send a user page link to get all of their works, add the word zip to get them packed in archives."
    )
}

pub fn command_list() -> Vec<BotCommand> {
    GeneralCommand::bot_commands()
}

/// Pasted links can carry arbitrary query strings; those fall back to the canonical one.
fn caption_link(post: &Post, reference: &PostReference) -> String {
    let link = reference.link();
    if link.chars().count() > LINK_MAX_CHARS {
        canonical_link(post.id)
    } else {
        link
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
