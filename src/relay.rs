//! Bidirectional byte relay
//!
//! Forwards bytes verbatim between two streams until either side reaches
//! EOF or errors; finishing one direction tears down the other.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Relay bytes in both directions between `a` and `b`.
///
/// The two directions run as independent copies under a `select!`, so
/// neither's latency affects the other; whichever finishes first ends the
/// relay.
pub async fn relay<A, B>(a: A, b: B) -> std::io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = tokio::io::copy(&mut a_read, &mut b_write);
    let b_to_a = tokio::io::copy(&mut b_read, &mut a_write);

    tokio::select! {
        result = a_to_b => match result {
            Ok(bytes) => debug!(bytes, "relay a->b finished"),
            Err(err) => debug!(%err, "relay a->b error"),
        },
        result = b_to_a => match result {
            Ok(bytes) => debug!(bytes, "relay b->a finished"),
            Err(err) => debug!(%err, "relay b->a error"),
        },
    }

    Ok(())
}
