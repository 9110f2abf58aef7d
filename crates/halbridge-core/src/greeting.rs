//! Greetings sent when someone joins a channel.

use rand::seq::IndexedRandom;

/// Candidate greetings, sampled uniformly.
pub const GREETINGS: &[&str] = &[
    "hej",
    "hey",
    "yo",
    "goddag",
    "goddur",
    "værhilset",
    "hils",
    "dav",
    "davs",
    "farvel",
    "hvaså",
    "sup",
    "wsup",
    "velkommen",
    "hallo",
    "godmorgen",
    "godaften",
    "hejsa",
    "godnat",
    "godeftermiddag",
    "god_dag",
];

/// Pick a greeting with the given random source.
pub fn pick_greeting<R: rand::Rng + ?Sized>(rng: &mut R) -> &'static str {
    GREETINGS.choose(rng).copied().unwrap_or("hej")
}
