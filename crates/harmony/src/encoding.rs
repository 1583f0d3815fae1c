use tiktoken_rs::CoreBPE;

use crate::tokens::{SpecialToken, TokenId};

/// Opaque accessor to the model's tokenizer.
///
/// The codec depends only on these three operations; real engines plug their
/// own vocabulary in behind this trait.
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids. With `allow_special`, `<|…|>` control
    /// literals map to their reserved ids instead of being tokenized as
    /// plain text.
    fn encode(&self, text: &str, allow_special: bool) -> Vec<TokenId>;

    /// Decode token ids back into text. Control tokens decode to their
    /// literals; undecodable ids are dropped rather than failing.
    fn decode(&self, tokens: &[TokenId]) -> String;

    /// Resolve a control token to its id in this vocabulary.
    fn special_id(&self, token: SpecialToken) -> TokenId;
}

/// The o200k tokenizer with the Harmony control-token table.
///
/// Ordinary text goes through tiktoken's `o200k_base` ranks; the six Harmony
/// control tokens sit above the base vocabulary and are spliced in around it.
pub struct HarmonyEncoding {
    bpe: CoreBPE,
}

impl HarmonyEncoding {
    /// Load the o200k encoding. Fails only if the embedded rank data cannot
    /// be initialized.
    pub fn o200k() -> anyhow::Result<Self> {
        let bpe = tiktoken_rs::o200k_base()?;
        Ok(Self { bpe })
    }

    fn flush_run(&self, run: &mut Vec<TokenId>, out: &mut String) {
        if run.is_empty() {
            return;
        }

        // Contiguous ordinary runs decode together so multi-byte sequences
        // split across tokens still resolve.
        match self.bpe.decode(run.clone()) {
            Ok(text) => out.push_str(&text),
            Err(_) => {
                // Degraded path: salvage what decodes on its own.
                for &id in run.iter() {
                    match self.bpe.decode(vec![id]) {
                        Ok(text) => out.push_str(&text),
                        Err(error) => log::debug!("dropping undecodable token {id}: {error}"),
                    }
                }
            }
        }

        run.clear();
    }
}

impl Tokenizer for HarmonyEncoding {
    fn encode(&self, text: &str, allow_special: bool) -> Vec<TokenId> {
        if !allow_special {
            return self.bpe.encode_ordinary(text);
        }

        let mut out = Vec::new();
        let mut rest = text;

        while !rest.is_empty() {
            match find_first_special(rest) {
                Some((at, token)) => {
                    if at > 0 {
                        out.extend(self.bpe.encode_ordinary(&rest[..at]));
                    }

                    out.push(token.id());
                    rest = &rest[at + token.literal().len()..];
                }
                None => {
                    out.extend(self.bpe.encode_ordinary(rest));
                    break;
                }
            }
        }

        out
    }

    fn decode(&self, tokens: &[TokenId]) -> String {
        let mut out = String::new();
        let mut run: Vec<TokenId> = Vec::new();

        for &id in tokens {
            match SpecialToken::from_id(id) {
                Some(token) => {
                    self.flush_run(&mut run, &mut out);
                    out.push_str(token.literal());
                }
                None => run.push(id),
            }
        }

        self.flush_run(&mut run, &mut out);
        out
    }

    fn special_id(&self, token: SpecialToken) -> TokenId {
        token.id()
    }
}

fn find_first_special(text: &str) -> Option<(usize, SpecialToken)> {
    SpecialToken::ALL
        .into_iter()
        .filter_map(|token| text.find(token.literal()).map(|at| (at, token)))
        .min_by_key(|&(at, _)| at)
}
