//! Text to token ids and back.

use std::path::Path;

use tokenizers::Tokenizer;
use tracing::info;

use super::loader::hub_repo;
use crate::config::TokenizerSource;
use crate::core::sequence::TokenId;
use crate::error::{Error, Result};

/// EOS spellings tried, in order, when a tokenizer is loaded.
const EOS_CANDIDATES: [&str; 4] = ["<|endoftext|>", "</s>", "<|im_end|>", "<eos>"];

/// Encodes prompts and decodes generated tokens.
pub enum TextCodec {
    /// Comma or whitespace separated token ids, for runs without a tokenizer.
    Ids,
    /// A HuggingFace tokenizer.
    Tokenizer(Box<Tokenizer>),
}

impl std::fmt::Debug for TextCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ids => f.write_str("TextCodec::Ids"),
            Self::Tokenizer(_) => f.write_str("TextCodec::Tokenizer"),
        }
    }
}

impl TextCodec {
    /// Load from a `tokenizer.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            Error::Tokenization(format!("failed to load {}: {e}", path.display()))
        })?;
        Ok(Self::Tokenizer(Box::new(tokenizer)))
    }

    /// Download `tokenizer.json` from a HuggingFace Hub repo.
    pub fn from_hub(repo_id: &str, revision: &str) -> Result<Self> {
        let path = hub_repo(repo_id, revision)?
            .get("tokenizer.json")
            .map_err(|e| Error::ModelLoad(format!("failed to download tokenizer.json: {e}")))?;
        Self::from_file(path)
    }

    /// Build the codec a [`TokenizerSource`] describes.
    pub fn load(source: &TokenizerSource) -> Result<Self> {
        match source {
            TokenizerSource::Ids => Ok(Self::Ids),
            TokenizerSource::File { path } => {
                info!(path = %path.display(), "loading tokenizer");
                Self::from_file(path)
            }
            TokenizerSource::Hub { repo_id, revision } => {
                info!(%repo_id, %revision, "downloading tokenizer");
                Self::from_hub(repo_id, revision)
            }
        }
    }

    /// Encode a prompt.
    pub fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        match self {
            Self::Ids => parse_ids(text),
            Self::Tokenizer(tokenizer) => {
                let encoding = tokenizer
                    .encode(text, true)
                    .map_err(|e| Error::Tokenization(format!("encode failed: {e}")))?;
                Ok(encoding.get_ids().to_vec())
            }
        }
    }

    /// Decode generated tokens.
    pub fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        match self {
            Self::Ids => Ok(tokens
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(",")),
            Self::Tokenizer(tokenizer) => tokenizer
                .decode(tokens, true)
                .map_err(|e| Error::Tokenization(format!("decode failed: {e}"))),
        }
    }

    /// The tokenizer's end-of-sequence token, if it has a known one.
    pub fn eos_token_id(&self) -> Option<TokenId> {
        match self {
            Self::Ids => None,
            Self::Tokenizer(tokenizer) => EOS_CANDIDATES
                .iter()
                .find_map(|token| tokenizer.token_to_id(token)),
        }
    }
}

fn parse_ids(text: &str) -> Result<Vec<TokenId>> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<TokenId>()
                .map_err(|_| Error::Tokenization(format!("'{s}' is not a token id")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_codec_round_trip() {
        let codec = TextCodec::Ids;
        let ids = codec.encode("1, 2,3  40").unwrap();
        assert_eq!(ids, vec![1, 2, 3, 40]);
        assert_eq!(codec.decode(&ids).unwrap(), "1,2,3,40");
        assert_eq!(codec.eos_token_id(), None);
    }

    #[test]
    fn test_id_codec_rejects_words() {
        let err = TextCodec::Ids.encode("1, two").unwrap_err();
        assert!(matches!(err, Error::Tokenization(_)));
    }

    #[test]
    fn test_missing_tokenizer_file() {
        assert!(TextCodec::from_file("/nonexistent/tokenizer.json").is_err());
    }
}
