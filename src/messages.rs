// src/messages.rs

use crate::state::{Ruleset, Team};

/// Regional-indicator emoji for an ISO country code ("fr" -> 🇫🇷)
pub fn flag_to_emoji(code: &str) -> String {
    let code = code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return "🏳️".to_string();
    }
    code.to_ascii_uppercase()
        .chars()
        .filter_map(|c| char::from_u32(0x1F1E6 + (c as u32 - 'A' as u32)))
        .collect()
}

pub fn waiting_channel_name(member_name: &str) -> String {
    format!("Waiting for mate - {}", member_name)
}

pub fn team_ready_channel_name(team: &str) -> String {
    format!("Team Ready - {}", team)
}

pub fn match_pending_channel_name(team: &str) -> String {
    format!("Match pending - {}", team)
}

/// Text channel names are lower case with dashes
pub fn match_channel_name(team_a: &Team, team_b: &Team) -> String {
    let raw = format!(
        "{}-{}-vs-{}-{}",
        team_a.member1.surname, team_a.member2.surname, team_b.member1.surname, team_b.member2.surname
    );
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    cleaned.chars().take(100).collect()
}

pub fn match_announcement(team_a: &Team, team_b: &Team, ruleset: Ruleset, users: &[u64]) -> String {
    let mentions: Vec<String> = users.iter().map(|id| format!("<@{}>", id)).collect();
    format!(
        "⚔️ **New {} match!**\n\n\
        **{}** vs **{}**\n\n\
        {}\n\n\
        Create the duel on GeoGuessr, then post the summary link in the summary channel once it is over.",
        ruleset,
        team_a.display_name(),
        team_b.display_name(),
        mentions.join(" ")
    )
}

pub fn not_eligible_message() -> String {
    "Hello, you and your mate need to be both registered as NM or NMPZ players to join the queue in the sign-up channel.".to_string()
}

pub fn not_a_team_message() -> String {
    "You have to create a team with the other player before joining the voice channel".to_string()
}

pub fn thanks_message() -> String {
    "Thanks for your participation! To play again, just recreate a new vocal and tell your mate to rejoin!".to_string()
}

pub fn match_cancelled_message(reason: &str) -> String {
    format!("❌ **Match cancelled**\n\n{}", reason)
}

pub fn registration_success_message(surname: &str, flag: &str) -> String {
    format!(
        "🎉 **Welcome on board {} {}!**\n\n\
        You are now registered as a player. Create your team with the `/team` command.",
        flag_to_emoji(flag),
        surname
    )
}

pub fn team_created_message(partner_mention: &str) -> String {
    format!(
        "🎉 **You are now in a team with {}!**\n\n\
        If this is an error, please contact an admin.",
        partner_mention
    )
}
