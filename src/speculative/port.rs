//! The scoring capability shared by draft and target models.

use candle_core::{DType, Tensor, D};

use crate::core::sequence::TokenId;
use crate::error::{Error, ModelRole, Result};

/// A language model that scores a whole context in one forward evaluation.
///
/// `score` returns logits of shape `[seq_len, vocab_size]` (a leading batch
/// dimension of 1 is also accepted), where row `i` is the distribution over
/// the token that follows position `i`. The result must depend only on
/// `context`: the verifier relies on that to check every proposal from a
/// single call.
///
/// How the scoring is computed (device, precision, batching, caching) is up
/// to the implementation. Draft and target ports are owned separately and
/// never share state.
pub trait LanguageModelPort {
    /// Score every position of `context`.
    fn score(&mut self, context: &[TokenId]) -> candle_core::Result<Tensor>;
}

impl<P: LanguageModelPort + ?Sized> LanguageModelPort for &mut P {
    fn score(&mut self, context: &[TokenId]) -> candle_core::Result<Tensor> {
        (**self).score(context)
    }
}

impl<P: LanguageModelPort + ?Sized> LanguageModelPort for Box<P> {
    fn score(&mut self, context: &[TokenId]) -> candle_core::Result<Tensor> {
        (**self).score(context)
    }
}

/// Call the port and check the logits cover every context position.
///
/// Returns a `[seq_len, vocab_size]` f32 tensor.
pub fn score_checked<P: LanguageModelPort + ?Sized>(
    port: &mut P,
    role: ModelRole,
    context: &[TokenId],
) -> Result<Tensor> {
    let logits = port
        .score(context)
        .map_err(|e| Error::invocation(role, e))?;

    let dims = logits.dims().to_vec();
    let logits = match dims.as_slice() {
        [1, _, _] => logits.squeeze(0)?,
        [_, _] => logits,
        dims => {
            return Err(Error::InvalidLogits {
                role,
                reason: format!("expected [seq, vocab] logits, got shape {dims:?}"),
            })
        }
    };

    let (rows, vocab) = logits.dims2()?;
    if rows != context.len() {
        return Err(Error::InvalidLogits {
            role,
            reason: format!("{rows} logit rows for a context of {} tokens", context.len()),
        });
    }
    if vocab == 0 {
        return Err(Error::InvalidLogits {
            role,
            reason: "empty vocabulary".into(),
        });
    }

    Ok(logits.to_dtype(DType::F32)?)
}

/// Greedy (argmax) prediction for every position of `context`.
///
/// `predictions[i]` is the model's choice for the token after position `i`.
pub fn greedy_predictions<P: LanguageModelPort + ?Sized>(
    port: &mut P,
    role: ModelRole,
    context: &[TokenId],
) -> Result<Vec<TokenId>> {
    let logits = score_checked(port, role, context)?;
    Ok(logits.argmax(D::Minus1)?.to_vec1::<u32>()?)
}

/// Logits for the token following the whole context, shape `[vocab_size]`.
pub fn next_token_logits<P: LanguageModelPort + ?Sized>(
    port: &mut P,
    role: ModelRole,
    context: &[TokenId],
) -> Result<Tensor> {
    let logits = score_checked(port, role, context)?;
    let rows = logits.dim(0)?;
    Ok(logits.get(rows - 1)?)
}
