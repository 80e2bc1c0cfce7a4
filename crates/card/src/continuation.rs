//! Multi-frame responses.
//!
//! A card that has more to say answers with a status word in
//! `9001..=9100` and expects the terminal to ask again. The loop here is
//! iterative and bounded so a misbehaving card cannot keep the terminal busy
//! forever.

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::apdu::Response;
use crate::status::StatusKind;
use crate::{Error, Result};

/// Collect the payload of every frame of a logical response.
///
/// `first` is the response to the initial command; `next` issues the follow-up
/// request. At most `max_frames` frames are accepted.
pub fn collect_frames<F>(first: Response, max_frames: usize, next: F) -> Result<Vec<Bytes>>
where
    F: FnMut() -> Result<Response>,
{
    let mut frames = Vec::new();
    collect_frames_into(first, max_frames, &mut frames, next)?;
    Ok(frames)
}

/// [`collect_frames`] into a caller owned buffer.
///
/// On error `frames` still holds every payload received before the failure,
/// which matters for responses the card cannot produce twice.
pub fn collect_frames_into<F>(
    first: Response,
    max_frames: usize,
    frames: &mut Vec<Bytes>,
    mut next: F,
) -> Result<()>
where
    F: FnMut() -> Result<Response>,
{
    let start = frames.len();
    let mut current = first;

    loop {
        match current.status().kind() {
            StatusKind::Success => {
                frames.push(current.into_data());
                debug!(frames = frames.len() - start, "response complete");
                return Ok(());
            }
            StatusKind::Continuation { remaining } => {
                frames.push(current.into_data());
                if frames.len() - start >= max_frames {
                    return Err(Error::ContinuationLimitExceeded(max_frames));
                }
                trace!(remaining, "continuation");
                current = next()?;
            }
            StatusKind::PinTriesRemaining(_) | StatusKind::Failure(_) => {
                return Err(Error::from_status(current.status()));
            }
        }
    }
}

/// Concatenate frame payloads.
pub fn assemble(frames: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::with_capacity(frames.iter().map(Bytes::len).sum());
    for frame in frames {
        buf.extend_from_slice(frame);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::apdu::TransportError;
    use crate::status::CardError;

    fn scripted(responses: Vec<Response>) -> (VecDeque<Response>, usize) {
        (responses.into(), 0)
    }

    #[test]
    fn test_three_frames() {
        let (mut queue, mut requests) = scripted(vec![
            Response::new(vec![0x03, 0x04], 0x9002u16),
            Response::new(vec![0x05], 0x9000u16),
        ]);

        let frames = collect_frames(Response::new(vec![0x01, 0x02], 0x9005u16), 64, || {
            requests += 1;
            Ok(queue.pop_front().unwrap())
        })
        .unwrap();

        assert_eq!(requests, 2);
        assert_eq!(frames.len(), 3);
        assert_eq!(assemble(&frames).as_ref(), &[0x01, 0x02, 0x03, 0x04, 0x05]);
    }

    #[test]
    fn test_single_frame_makes_no_request() {
        let mut requests = 0;
        let frames = collect_frames(Response::success(vec![0xAA]), 64, || {
            requests += 1;
            Ok(Response::success(Bytes::new()))
        })
        .unwrap();

        assert_eq!(requests, 0);
        assert_eq!(assemble(&frames).as_ref(), &[0xAA]);
    }

    #[test]
    fn test_frame_cap() {
        let mut requests = 0;
        let err = collect_frames(Response::new(vec![0x00], 0x9001u16), 4, || {
            requests += 1;
            Ok(Response::new(vec![0x00], 0x9001u16))
        })
        .unwrap_err();

        assert!(matches!(err, Error::ContinuationLimitExceeded(4)));
        assert_eq!(requests, 3);
    }

    #[test]
    fn test_error_mid_stream() {
        let err = collect_frames(Response::new(vec![0x00], 0x9001u16), 64, || {
            Ok(Response::status_only(0x6A86u16))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Card(CardError::IncorrectP1P2)));
    }

    #[test]
    fn test_frames_kept_on_failure() {
        let mut requests = 0;
        let mut frames = Vec::new();
        let err = collect_frames_into(Response::new(vec![0x01], 0x9002u16), 64, &mut frames, || {
            requests += 1;
            if requests == 1 {
                Ok(Response::new(vec![0x02], 0x9001u16))
            } else {
                Err(Error::Transport(TransportError::Disconnected))
            }
        })
        .unwrap_err();

        assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
        assert_eq!(frames, vec![Bytes::from_static(&[0x01]), Bytes::from_static(&[0x02])]);
    }

    #[test]
    fn test_transport_error_propagates() {
        let err = collect_frames(Response::new(vec![0x00], 0x9001u16), 64, || {
            Err(Error::SecureChannelNotOpen)
        })
        .unwrap_err();
        assert!(matches!(err, Error::SecureChannelNotOpen));
    }
}
