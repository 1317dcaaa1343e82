//! ECDSA signature normalisation from ASN.1 DER to the fixed-width `R || S`
//! form JWTs carry.

use crate::error::PushError;

/// `R || S` length for P-256.
pub const P256_JOSE_LENGTH: usize = 64;

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;

/// Converts a DER `SEQUENCE { INTEGER r, INTEGER s }` into `jose_len` bytes of
/// left-padded `r || s`. Input that is already `jose_len` bytes long is taken
/// as raw `r || s` and returned unchanged.
pub fn der_to_jose(signature: &[u8], jose_len: usize) -> Result<Vec<u8>, PushError> {
    if signature.len() == jose_len {
        return Ok(signature.to_vec());
    }

    parse_der(signature, jose_len)
}

fn parse_der(signature: &[u8], jose_len: usize) -> Result<Vec<u8>, PushError> {
    let half = jose_len / 2;
    let mut der = DerReader::new(signature);

    if der.byte()? != TAG_SEQUENCE {
        return Err(PushError::InvalidSignatureFormat("expected SEQUENCE"));
    }
    if der.length()? != der.remaining() {
        return Err(PushError::InvalidSignatureFormat("SEQUENCE length mismatch"));
    }

    let r = der.integer()?;
    let s = der.integer()?;
    if der.remaining() != 0 {
        return Err(PushError::InvalidSignatureFormat("trailing bytes"));
    }

    let mut jose = vec![0u8; jose_len];
    left_pad_into(&mut jose[..half], r)?;
    left_pad_into(&mut jose[half..], s)?;
    Ok(jose)
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let zeros = bytes
        .iter()
        .take(bytes.len().saturating_sub(1))
        .take_while(|b| **b == 0)
        .count();
    &bytes[zeros..]
}

fn left_pad_into(out: &mut [u8], component: &[u8]) -> Result<(), PushError> {
    let component = strip_leading_zeros(component);
    if component.len() > out.len() {
        return Err(PushError::InvalidSignatureFormat(
            "integer longer than curve order",
        ));
    }
    let offset = out.len() - component.len();
    out[offset..].copy_from_slice(component);
    Ok(())
}

struct DerReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> DerReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        DerReader { bytes, offset: 0 }
    }

    fn byte(&mut self) -> Result<u8, PushError> {
        let byte = *self
            .bytes
            .get(self.offset)
            .ok_or(PushError::InvalidSignatureFormat("truncated"))?;
        self.offset += 1;
        Ok(byte)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PushError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(PushError::InvalidSignatureFormat("truncated"))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Short form, or long form `0x80 | n` followed by `n` big-endian bytes.
    fn length(&mut self) -> Result<usize, PushError> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }

        let count = usize::from(first & 0x7f);
        if count == 0 || count > std::mem::size_of::<usize>() {
            return Err(PushError::InvalidSignatureFormat("unsupported length"));
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | usize::from(self.byte()?);
        }
        Ok(len)
    }

    fn integer(&mut self) -> Result<&'a [u8], PushError> {
        if self.byte()? != TAG_INTEGER {
            return Err(PushError::InvalidSignatureFormat("expected INTEGER"));
        }
        let len = self.length()?;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn der(r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut body = vec![TAG_INTEGER, r.len() as u8];
        body.extend_from_slice(r);
        body.extend_from_slice(&[TAG_INTEGER, s.len() as u8]);
        body.extend_from_slice(s);

        let mut out = vec![TAG_SEQUENCE, body.len() as u8];
        out.extend(body);
        out
    }

    #[test]
    fn it_should_strip_sign_bit_padding() {
        let mut r = vec![0x00];
        r.extend([0x80; 32]);
        let s = vec![0x7f; 32];

        let jose = der_to_jose(&der(&r, &s), P256_JOSE_LENGTH).unwrap();

        assert_eq!(jose.len(), 64);
        assert_eq!(&jose[..32], &[0x80; 32]);
        assert_eq!(&jose[32..], &[0x7f; 32]);
    }

    #[test]
    fn it_should_left_pad_short_components() {
        let r = vec![0x01; 30];
        let s = vec![0x02];

        let jose = der_to_jose(&der(&r, &s), P256_JOSE_LENGTH).unwrap();

        assert_eq!(jose.len(), 64);
        assert_eq!(&jose[..2], &[0, 0]);
        assert_eq!(&jose[2..32], &[0x01; 30]);
        assert_eq!(&jose[32..63], &[0u8; 31]);
        assert_eq!(jose[63], 0x02);
    }

    #[test]
    fn it_should_read_long_form_sequence_length() {
        let plain = der(&[0x05; 32], &[0x06; 32]);
        let mut long_form = vec![TAG_SEQUENCE, 0x81, plain[1]];
        long_form.extend_from_slice(&plain[2..]);

        let jose = der_to_jose(&long_form, P256_JOSE_LENGTH).unwrap();

        assert_eq!(&jose[..32], &[0x05; 32]);
        assert_eq!(&jose[32..], &[0x06; 32]);
    }

    #[test]
    fn it_should_pass_raw_signatures_through() {
        let raw: Vec<u8> = (0..64).collect();
        assert_eq!(der_to_jose(&raw, P256_JOSE_LENGTH).unwrap(), raw);

        let mut starts_like_der = vec![TAG_SEQUENCE];
        starts_like_der.extend([0xaa; 63]);
        assert_eq!(
            der_to_jose(&starts_like_der, P256_JOSE_LENGTH).unwrap(),
            starts_like_der
        );
    }

    #[test]
    fn it_should_keep_raw_signatures_that_parse_as_der() {
        let mut raw = vec![TAG_SEQUENCE, 0x3e, TAG_INTEGER, 0x1d];
        raw.extend([0x11; 29]);
        raw.extend([TAG_INTEGER, 0x1d]);
        raw.extend([0x22; 29]);
        assert_eq!(raw.len(), P256_JOSE_LENGTH);

        assert_eq!(der_to_jose(&raw, P256_JOSE_LENGTH).unwrap(), raw);
    }

    #[test]
    fn it_should_require_exact_der_lengths() {
        let good = der(&[0x01; 32], &[0x02; 32]);

        let mut short_sequence = good.clone();
        short_sequence[1] -= 1;
        assert!(matches!(
            der_to_jose(&short_sequence, P256_JOSE_LENGTH),
            Err(PushError::InvalidSignatureFormat(_))
        ));

        let mut trailing = good.clone();
        trailing[1] += 1;
        trailing.push(0x00);
        assert!(matches!(
            der_to_jose(&trailing, P256_JOSE_LENGTH),
            Err(PushError::InvalidSignatureFormat(_))
        ));
    }

    #[test]
    fn it_should_reject_malformed_der() {
        let good = der(&[0x01; 32], &[0x02; 32]);

        let mut bad_outer = good.clone();
        bad_outer[0] = 0x31;
        assert!(matches!(
            der_to_jose(&bad_outer, P256_JOSE_LENGTH),
            Err(PushError::InvalidSignatureFormat(_))
        ));

        let mut bad_inner = good.clone();
        bad_inner[2] = 0x03;
        assert!(matches!(
            der_to_jose(&bad_inner, P256_JOSE_LENGTH),
            Err(PushError::InvalidSignatureFormat(_))
        ));

        let too_long = der(&[0x01; 33], &[0x02; 32]);
        assert!(matches!(
            der_to_jose(&too_long, P256_JOSE_LENGTH),
            Err(PushError::InvalidSignatureFormat(_))
        ));

        assert!(matches!(
            der_to_jose(&good[..good.len() - 4], P256_JOSE_LENGTH),
            Err(PushError::InvalidSignatureFormat(_))
        ));
    }
}
