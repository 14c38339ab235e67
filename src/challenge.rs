//! Anti-bot challenge handling.
//!
//! Some responses are replaced by a script page that computes a cookie and
//! reloads. The retry loop in [`crate::http`] detects that page, asks a
//! [`ChallengeSolver`] for the cookie value, installs it and retries.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DriveError, Result};

/// Literal that marks a challenge page; also the cookie name it expects.
pub const CHALLENGE_MARKER: &str = "acw_sc__v2";

/// Computes the cookie value answering a challenge page.
pub trait ChallengeSolver: Send + Sync {
    fn solve(&self, body: &str) -> Result<String>;
}

impl<F> ChallengeSolver for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn solve(&self, body: &str) -> Result<String> {
        self(body)
    }
}

/// What the retry hook did with a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// No challenge marker; nothing to do.
    NotChallenge,
    /// Cookie computed and installed before the retry.
    Solved,
    /// Marker present but the solver failed; the retry goes out unchanged.
    Unsolved,
}

pub fn is_challenge(body: &str) -> bool {
    body.contains(CHALLENGE_MARKER)
}

static ARG1_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"arg1='([0-9A-Z]+)'").expect("Invalid arg1 regex"));

const DEFAULT_PERMUTATION: [usize; 40] = [
    15, 35, 29, 24, 33, 16, 1, 38, 10, 9, 19, 31, 40, 27, 22, 23, 25, 13, 6, 11, 39, 18, 20, 8, 14,
    21, 32, 26, 2, 30, 7, 4, 17, 5, 3, 28, 34, 37, 12, 36,
];

const DEFAULT_KEY: &str = "3000176000856006061501533003690027800375";

/// Solver for the `arg1` challenge: the page's hex token is shuffled by a
/// fixed permutation and XOR-ed with a fixed key.
///
/// Both tables change whenever the vendor rotates the script, so they are
/// plain data here.
#[derive(Debug, Clone)]
pub struct PermuteXorSolver {
    permutation: Vec<usize>,
    key: String,
}

impl Default for PermuteXorSolver {
    fn default() -> Self {
        Self::new(DEFAULT_PERMUTATION.to_vec(), DEFAULT_KEY.to_string())
    }
}

impl PermuteXorSolver {
    /// `permutation[k] == i + 1` moves input position `i` to output position `k`.
    pub fn new(permutation: Vec<usize>, key: String) -> Self {
        Self { permutation, key }
    }

    fn unbox(&self, token: &str) -> Result<String> {
        let input: Vec<char> = token.chars().collect();
        if input.len() < self.permutation.len() {
            return Err(DriveError::ChallengeUnresolved(format!(
                "token too short: {} < {}",
                input.len(),
                self.permutation.len()
            )));
        }

        let mut output = vec!['\0'; self.permutation.len()];
        for (i, &c) in input.iter().take(self.permutation.len()).enumerate() {
            for (k, &slot) in self.permutation.iter().enumerate() {
                if slot == i + 1 {
                    output[k] = c;
                }
            }
        }
        Ok(output.into_iter().filter(|&c| c != '\0').collect())
    }

    fn hex_xor(left: &str, right: &str) -> Result<String> {
        let mut out = String::with_capacity(left.len());
        let pairs = left.len().min(right.len()) / 2;
        for n in 0..pairs {
            let range = n * 2..n * 2 + 2;
            let a = left
                .get(range.clone())
                .and_then(|s| u8::from_str_radix(s, 16).ok());
            let b = right.get(range).and_then(|s| u8::from_str_radix(s, 16).ok());
            match (a, b) {
                (Some(a), Some(b)) => out.push_str(&format!("{:02x}", a ^ b)),
                _ => {
                    return Err(DriveError::ChallengeUnresolved(
                        "token is not hex".to_string(),
                    ))
                }
            }
        }
        Ok(out)
    }
}

impl ChallengeSolver for PermuteXorSolver {
    fn solve(&self, body: &str) -> Result<String> {
        let token = ARG1_REGEX
            .captures(body)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| DriveError::ChallengeUnresolved("arg1 not found".to_string()))?;
        let shuffled = self.unbox(token.as_str())?;
        Self::hex_xor(&shuffled, &self.key)
    }
}
