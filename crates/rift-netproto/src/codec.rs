use crate::{
    envelope::{Envelope, Target},
    error::ProtoError,
    limits::max_payload_for,
    messages::Message,
};

/// Encode a typed message into an [`Envelope`].
///
/// The envelope kind is taken from the message type.
pub fn encode_message<T: Message>(target: Target, msg: &T) -> Result<Envelope, ProtoError> {
    let payload = postcard::to_stdvec(msg)?;
    Ok(Envelope::new(target, T::kind(), payload))
}

/// Encode a typed message straight into wire bytes.
///
/// The payload limit is selected by delivery class: unreliable frames must fit
/// in one datagram.
pub fn encode_message_frame<T: Message>(
    target: Target,
    msg: &T,
    reliable: bool,
) -> Result<Vec<u8>, ProtoError> {
    let envelope = encode_message(target, msg)?;
    encode_envelope(&envelope, reliable)
}

/// Encode an envelope, enforcing the payload limit for the delivery class.
pub fn encode_envelope(envelope: &Envelope, reliable: bool) -> Result<Vec<u8>, ProtoError> {
    let max_payload = max_payload_for(reliable);
    if envelope.payload.len() > max_payload {
        return Err(ProtoError::PayloadTooLarge(envelope.payload.len()));
    }
    envelope.encode()
}

pub fn decode_envelope(buf: &[u8]) -> Result<Envelope, ProtoError> {
    Envelope::decode(buf)
}

/// Decode the body of an envelope as `T`, checking the kind first.
pub fn decode_body<T: Message>(envelope: &Envelope) -> Result<T, ProtoError> {
    if envelope.kind != T::kind() {
        return Err(ProtoError::KindMismatch {
            expected: T::kind(),
            actual: envelope.kind,
        });
    }
    Ok(postcard::from_bytes(&envelope.payload)?)
}
