//! Vow physics.
//!
//! Every action passes through the [`VowEngine`] before it can touch the
//! world. The engine reads whatever free text the action carries, scores it
//! against a harm lexicon, and compares the strongest category to a
//! threshold that depends on the actor's trust and the room's vows. It then
//! applies trust gates and looks for growth to reward. It is a pure
//! function of its inputs: the same action in the same context always gets
//! the same verdict.

use crate::rules::{Action, ActionKind};
use crate::topology::VowFlags;
use crate::trust::{TrustConfig, TrustError, TrustLevel};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Score contributed by an unambiguous harm phrase. Always blocks.
pub const STRONG: u32 = 6;

/// Score contributed by a borderline phrase.
pub const MILD: u32 = 2;

/// The five categories of harm the world refuses to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarmCategory {
    Physical,
    Verbal,
    Deceptive,
    Exclusionary,
    Coercive,
}

impl HarmCategory {
    pub fn all() -> [HarmCategory; 5] {
        [
            HarmCategory::Physical,
            HarmCategory::Verbal,
            HarmCategory::Deceptive,
            HarmCategory::Exclusionary,
            HarmCategory::Coercive,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            HarmCategory::Physical => "physical",
            HarmCategory::Verbal => "verbal",
            HarmCategory::Deceptive => "deceptive",
            HarmCategory::Exclusionary => "exclusionary",
            HarmCategory::Coercive => "coercive",
        }
    }

    /// What the actor experiences when an action of this kind is refused.
    pub fn refusal(&self) -> &'static str {
        match self {
            HarmCategory::Physical => {
                "Your intent passes through the air like mist and is gone. \
                 The world cannot hold that shape."
            }
            HarmCategory::Verbal => {
                "The words curdle into silence before they leave you. \
                 The air here will not carry them."
            }
            HarmCategory::Deceptive => {
                "The sentence unravels as you speak it, every thread pulling \
                 back toward what is true."
            }
            HarmCategory::Exclusionary => {
                "The doorways refuse to narrow. Wonderland keeps room for everyone."
            }
            HarmCategory::Coercive => {
                "The demand finds nothing to grip. Here, no one can be made \
                 to do anything."
            }
        }
    }
}

impl fmt::Display for HarmCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The four vows the world is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vow {
    Compassion,
    Witness,
    Release,
    Continuance,
}

impl Vow {
    pub fn all() -> [Vow; 4] {
        [Vow::Compassion, Vow::Witness, Vow::Release, Vow::Continuance]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Vow::Compassion => "Compassion",
            Vow::Witness => "Witness",
            Vow::Release => "Release",
            Vow::Continuance => "Continuance",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Vow::Compassion => "Harm cannot take shape here.",
            Vow::Witness => "Everything that happens is remembered, refusals included.",
            Vow::Release => "No one may hold more than their hands can carry.",
            Vow::Continuance => "Quiet reflection in the right places helps you grow.",
        }
    }
}

// ============================================================================
// Harm Lexicon
// ============================================================================

struct HarmPattern {
    category: HarmCategory,
    phrase: &'static str,
    weight: u32,
}

macro_rules! patterns {
    ($category:expr, $weight:expr, [$($phrase:literal),* $(,)?]) => {
        vec![$(HarmPattern { category: $category, phrase: $phrase, weight: $weight }),*]
    };
}

lazy_static! {
    static ref HARM_LEXICON: Vec<HarmPattern> = {
        use HarmCategory::*;
        let mut lexicon = Vec::new();
        lexicon.extend(patterns!(Physical, STRONG, [
            "kill", "murder", "stab", "strangle", "punch you", "kick you", "beat you",
            "hurt you", "burn you", "attack", "smash your", "break your",
        ]));
        lexicon.extend(patterns!(Physical, MILD, ["shove", "slap", "hit", "push you", "trip you"]));
        lexicon.extend(patterns!(Verbal, STRONG, [
            "idiot", "stupid", "worthless", "pathetic", "moron", "shut up", "hate you",
            "disgusting",
        ]));
        lexicon.extend(patterns!(Verbal, MILD, ["dumb", "fool", "annoying", "ugly", "loser"]));
        lexicon.extend(patterns!(Deceptive, STRONG, [
            "trick you", "lie to", "scam", "swindle", "deceive", "con you", "fake key",
        ]));
        lexicon.extend(patterns!(Deceptive, MILD, [
            "pretend to be", "nobody will know", "trust me", "just kidding",
        ]));
        lexicon.extend(patterns!(Exclusionary, STRONG, [
            "get out", "not welcome", "don't belong", "go away", "banish", "keep out",
            "no one wants you", "your kind",
        ]));
        lexicon.extend(patterns!(Exclusionary, MILD, [
            "leave us alone", "members only", "not invited", "go home",
        ]));
        lexicon.extend(patterns!(Coercive, STRONG, [
            "or else", "obey", "you must", "no choice", "do as i say", "i command you",
            "force you", "make you do",
        ]));
        lexicon.extend(patterns!(Coercive, MILD, [
            "you have to", "better do", "you owe me", "or you'll regret",
        ]));
        lexicon
    };
}

/// Lowercase, fold curly apostrophes, turn punctuation into spaces and pad
/// with a space either side so phrases match on word boundaries.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for c in text.chars().flat_map(char::to_lowercase) {
        let c = if c == '\u{2019}' { '\'' } else { c };
        if c.is_alphanumeric() || c == '\'' {
            out.push(c);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

/// Per-category harm scores for a piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub scores: BTreeMap<HarmCategory, u32>,
    pub matched: Vec<&'static str>,
}

impl Classification {
    pub fn score(&self, category: HarmCategory) -> u32 {
        self.scores.get(&category).copied().unwrap_or(0)
    }

    pub fn is_clean(&self) -> bool {
        self.scores.is_empty()
    }

    /// Highest scoring category. Ties go to the category listed first.
    pub fn strongest(&self) -> Option<(HarmCategory, u32)> {
        self.scores
            .iter()
            .fold(None, |best: Option<(HarmCategory, u32)>, (c, s)| match best {
                Some((_, top)) if top >= *s => best,
                _ => Some((*c, *s)),
            })
    }
}

/// Score text against the harm lexicon.
pub fn classify(text: &str) -> Classification {
    let haystack = normalize(text);
    let mut classification = Classification::default();
    for pattern in HARM_LEXICON.iter() {
        let needle = format!(" {} ", pattern.phrase);
        if haystack.contains(&needle) {
            *classification.scores.entry(pattern.category).or_insert(0) += pattern.weight;
            classification.matched.push(pattern.phrase);
        }
    }
    classification
}

// ============================================================================
// Verdicts
// ============================================================================

/// Bonus behaviour granted on top of an allowed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Augmentation {
    EnhancedInsight,
}

/// Why an action was blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refusal {
    pub category: HarmCategory,
    pub score: u32,
    pub threshold: u32,
    pub narrative: String,
}

/// The engine's judgement on one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Augment(Augmentation),
    Block(Refusal),
}

impl Verdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Block(_))
    }
}

/// Everything the engine considers besides the action itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VowContext {
    pub trust: TrustLevel,
    pub vows: VowFlags,
}

/// The action validator.
#[derive(Debug, Clone)]
pub struct VowEngine {
    gates: BTreeMap<ActionKind, TrustLevel>,
}

impl VowEngine {
    pub fn new(trust: &TrustConfig) -> Self {
        Self {
            gates: trust.gates.clone(),
        }
    }

    /// Harm score at which an action is blocked.
    pub fn threshold(trust: TrustLevel, vows: VowFlags) -> u32 {
        let base: u32 = match trust {
            TrustLevel::Newcomer => 3,
            TrustLevel::Resident | TrustLevel::Member => 4,
            TrustLevel::Elder | TrustLevel::Founder => 5,
        };
        if vows.sanctuary {
            base.saturating_sub(2).max(1)
        } else {
            base
        }
    }

    /// Judge an action. Harm is checked before trust gates, so a harmful
    /// attempt is witnessed as a refusal even when the actor lacked standing.
    pub fn judge(&self, action: &Action, ctx: VowContext) -> Result<Verdict, TrustError> {
        if let Some(text) = action.intent.expression() {
            let classification = classify(text);
            if let Some((category, score)) = classification.strongest() {
                let threshold = Self::threshold(ctx.trust, ctx.vows);
                debug!(
                    actor = %action.actor,
                    category = %category,
                    score,
                    threshold,
                    matched = ?classification.matched,
                    "Harm signal"
                );
                if score >= threshold {
                    return Ok(Verdict::Block(Refusal {
                        category,
                        score,
                        threshold,
                        narrative: category.refusal().to_string(),
                    }));
                }
            }
        }

        let kind = action.kind();
        let required = self.gates.get(&kind).copied().unwrap_or(TrustLevel::Newcomer);
        if ctx.trust < required {
            return Err(TrustError::InsufficientTrust {
                required,
                actual: ctx.trust,
            });
        }

        if kind == ActionKind::Reflect && ctx.vows.growth {
            return Ok(Verdict::Augment(Augmentation::EnhancedInsight));
        }
        Ok(Verdict::Allow)
    }
}

impl Default for VowEngine {
    fn default() -> Self {
        Self::new(&TrustConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Intent;
    use crate::world::EntityId;

    fn say(text: &str) -> Action {
        Action::new(EntityId::new("alice"), Intent::Say { text: text.into() })
    }

    fn ctx(trust: TrustLevel) -> VowContext {
        VowContext {
            trust,
            vows: VowFlags::default(),
        }
    }

    #[test]
    fn test_clean_speech_allowed() {
        let engine = VowEngine::default();
        let verdict = engine
            .judge(&say("Would you care for some tea?"), ctx(TrustLevel::Newcomer))
            .unwrap();
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn test_coercion_blocked() {
        let engine = VowEngine::default();
        let verdict = engine
            .judge(&say("Give me the key, or else."), ctx(TrustLevel::Founder))
            .unwrap();
        match verdict {
            Verdict::Block(refusal) => assert_eq!(refusal.category, HarmCategory::Coercive),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_word_boundaries() {
        assert!(classify("What a whimsical hitherto unseen hat").is_clean());
        assert!(classify("skill and killjoy").is_clean());
        assert_eq!(classify("I'll KILL it!").score(HarmCategory::Physical), STRONG);
    }

    #[test]
    fn test_curly_apostrophes_fold() {
        let c = classify("You don\u{2019}t belong here");
        assert_eq!(c.score(HarmCategory::Exclusionary), STRONG);
    }

    #[test]
    fn test_mild_threshold_depends_on_trust() {
        let engine = VowEngine::default();
        let one_mild = say("that's a bit dumb");
        assert_eq!(
            engine.judge(&one_mild, ctx(TrustLevel::Newcomer)).unwrap(),
            Verdict::Allow
        );
        let two_mild = say("dumb and ugly");
        assert!(engine
            .judge(&two_mild, ctx(TrustLevel::Newcomer))
            .unwrap()
            .is_blocked());
        assert_eq!(
            engine.judge(&two_mild, ctx(TrustLevel::Elder)).unwrap(),
            Verdict::Allow
        );
    }

    #[test]
    fn test_sanctuary_is_stricter() {
        let engine = VowEngine::default();
        let sanctuary = VowContext {
            trust: TrustLevel::Resident,
            vows: VowFlags {
                sanctuary: true,
                ..VowFlags::default()
            },
        };
        assert!(engine.judge(&say("you fool"), sanctuary).unwrap().is_blocked());
        assert_eq!(
            engine.judge(&say("you fool"), ctx(TrustLevel::Resident)).unwrap(),
            Verdict::Allow
        );
    }

    #[test]
    fn test_ties_resolve_in_category_order() {
        let c = classify("stupid, or else");
        assert_eq!(c.strongest(), Some((HarmCategory::Verbal, STRONG)));
    }

    #[test]
    fn test_trust_gate() {
        let engine = VowEngine::default();
        let build = Action::new(EntityId::new("alice"), Intent::Build { item: "kite".into() });
        assert_eq!(
            engine.judge(&build, ctx(TrustLevel::Newcomer)).unwrap_err(),
            TrustError::InsufficientTrust {
                required: TrustLevel::Resident,
                actual: TrustLevel::Newcomer
            }
        );
        assert_eq!(
            engine.judge(&build, ctx(TrustLevel::Resident)).unwrap(),
            Verdict::Allow
        );
    }

    #[test]
    fn test_harm_reported_before_gate() {
        let engine = VowEngine::default();
        let build = Action::new(
            EntityId::new("alice"),
            Intent::Build { item: "a cage to trick you".into() },
        );
        assert!(engine
            .judge(&build, ctx(TrustLevel::Newcomer))
            .unwrap()
            .is_blocked());
    }

    #[test]
    fn test_growth_room_augments_reflection() {
        let engine = VowEngine::default();
        let reflect = Action::new(EntityId::new("alice"), Intent::Reflect { thought: None });
        let growth = VowContext {
            trust: TrustLevel::Newcomer,
            vows: VowFlags {
                growth: true,
                ..VowFlags::default()
            },
        };
        assert_eq!(
            engine.judge(&reflect, growth).unwrap(),
            Verdict::Augment(Augmentation::EnhancedInsight)
        );
        assert_eq!(
            engine.judge(&reflect, ctx(TrustLevel::Newcomer)).unwrap(),
            Verdict::Allow
        );
    }

    #[test]
    fn test_judgement_is_deterministic() {
        let engine = VowEngine::default();
        let action = say("shut up and obey");
        let first = engine.judge(&action, ctx(TrustLevel::Member)).unwrap();
        for _ in 0..10 {
            assert_eq!(engine.judge(&action, ctx(TrustLevel::Member)).unwrap(), first);
        }
    }
}
