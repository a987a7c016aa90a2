//! Dangerous-object detection in streamed model output.

use regex::Regex;
use std::sync::LazyLock;

/// Spoken ahead of any chunk that mentions a dangerous object.
pub const HAZARD_WARNING: &str = "Warning: Dangerous object detected. ";

const DANGEROUS_OBJECTS: &[&str] = &[
    "gun", "knife", "knives", "wire", "bomb", "explosive", "grenade", "acid", "poison",
    "syringe", "razor", "blade", "chainsaw", "machete", "taser", "pepper spray",
    "brass knuckles", "arrow", "crossbow", "flare gun", "molotov", "shiv", "stun gun",
    "throwing star", "nunchaku", "bat", "crowbar", "hammer", "axe", "scalpel", "needle",
    "mace", "katana", "dagger", "switchblade", "firearm", "pistol", "rifle", "shotgun",
    "ammunition", "bullet", "weapon", "dynamite", "tnt", "gunpowder", "chemical", "toxin",
    "venom", "spear", "bayonet", "missile", "mine", "trap", "spike", "shrapnel", "sword",
    "baton", "club", "revolver", "handgun", "garrote", "blackjack", "kunai", "chlorine",
    "cyanide", "radioactive", "uranium", "plutonium", "biological", "hazard",
];

// Word-bounded so "bathroom" or "determine" don't trip it; optional plural.
static RE_DANGER: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = DANGEROUS_OBJECTS
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})s?\b")).unwrap()
});

/// Whether `text` mentions a dangerous object.
pub fn mentions_hazard(text: &str) -> bool {
    RE_DANGER.is_match(text)
}
