//! Codec adapter
//!
//! Maps a single content-encoding token onto its inverse transform.

use bytes::Bytes;
use std::io::Read;

use super::DecodeError;

/// Supported content codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl Codec {
    /// Resolve a normalised (trimmed, lowercase) encoding token.
    pub fn from_token(token: &str) -> Result<Self, DecodeError> {
        match token {
            "identity" => Ok(Codec::Identity),
            "gzip" | "x-gzip" => Ok(Codec::Gzip),
            "deflate" => Ok(Codec::Deflate),
            "br" => Ok(Codec::Brotli),
            other => Err(DecodeError::unknown_encoding(other)),
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Codec::Identity => "identity",
            Codec::Gzip => "gzip",
            Codec::Deflate => "deflate",
            Codec::Brotli => "br",
        }
    }

    /// Undo this codec on `input`.
    ///
    /// `limit` caps the decoded size; exceeding it fails the step.
    pub fn decode(&self, input: Bytes, limit: Option<usize>) -> Result<Bytes, DecodeError> {
        match self {
            Codec::Identity => Ok(input),
            Codec::Gzip => read_limited(self, flate2::read::MultiGzDecoder::new(&input[..]), limit),
            Codec::Deflate => {
                if is_zlib_wrapped(&input) {
                    match read_limited(self, flate2::read::ZlibDecoder::new(&input[..]), limit) {
                        Err(DecodeError::Decompression { .. }) => {
                            // A raw stream can start with bytes that look like a zlib header.
                        }
                        result => return result,
                    }
                }
                read_limited(self, flate2::read::DeflateDecoder::new(&input[..]), limit)
            }
            Codec::Brotli => read_limited(self, brotli::Decompressor::new(&input[..], 4096), limit),
        }
    }
}

/// Apply the inverse of `token` to `input`.
pub fn apply(token: &str, input: Bytes, limit: Option<usize>) -> Result<Bytes, DecodeError> {
    Codec::from_token(token)?.decode(input, limit)
}

/// Content-encoding tokens in the order the encodings were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingChain(Vec<String>);

impl EncodingChain {
    /// Parse a `content-encoding` header. A missing or blank header yields a
    /// chain of just `identity`.
    pub fn parse(header: Option<&str>) -> Self {
        let tokens: Vec<String> = header
            .unwrap_or_default()
            .split(',')
            .map(|token| token.trim().to_ascii_lowercase())
            .filter(|token| !token.is_empty())
            .collect();

        if tokens.is_empty() {
            EncodingChain(vec![Codec::Identity.token().to_string()])
        } else {
            EncodingChain(tokens)
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    /// Tokens in the order they must be undone (last applied first)
    pub fn decode_order(&self) -> impl Iterator<Item = &str> {
        self.0.iter().rev().map(String::as_str)
    }
}

// zlib streams start with CMF/FLG: compression method 8 and a header
// checksum divisible by 31.
fn is_zlib_wrapped(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => cmf & 0x0F == 8 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

fn read_limited<R: Read>(codec: &Codec, reader: R, limit: Option<usize>) -> Result<Bytes, DecodeError> {
    let mut decoded = Vec::new();
    let result = match limit {
        Some(limit) => reader
            .take((limit as u64).saturating_add(1))
            .read_to_end(&mut decoded),
        None => {
            let mut reader = reader;
            reader.read_to_end(&mut decoded)
        }
    };

    result.map_err(|e| DecodeError::Decompression {
        encoding: codec.token().to_string(),
        message: e.to_string(),
    })?;

    if let Some(limit) = limit {
        if decoded.len() > limit {
            return Err(DecodeError::OutputTooLarge {
                encoding: codec.token().to_string(),
                limit,
            });
        }
    }
    Ok(Bytes::from(decoded))
}
