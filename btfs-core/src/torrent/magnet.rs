//! Magnet URI parsing.

use data_encoding::BASE32;

use super::{InfoHash, MetainfoError};

/// Parsed magnet URI: just enough to ask the swarm for the real metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

impl MagnetLink {
    /// Parses a `magnet:` URI.
    ///
    /// The `xt` info hash is accepted in 40-character hex or 32-character
    /// base32 form.
    ///
    /// # Errors
    /// - [`MetainfoError::InvalidMagnet`] - malformed URI, missing `xt`, or
    ///   an unrecognized hash encoding
    pub fn parse(uri: &str) -> Result<Self, MetainfoError> {
        let magnet = magnet_url::Magnet::new(uri).map_err(|e| MetainfoError::InvalidMagnet {
            reason: format!("{e:?}"),
        })?;

        let hash = magnet.xt.clone().ok_or_else(|| MetainfoError::InvalidMagnet {
            reason: "missing xt info hash".to_string(),
        })?;
        let info_hash = decode_info_hash(&hash)?;

        Ok(Self {
            info_hash,
            display_name: magnet.dn.clone(),
            trackers: magnet.tr.clone(),
        })
    }
}

fn decode_info_hash(hash: &str) -> Result<InfoHash, MetainfoError> {
    match hash.len() {
        40 => InfoHash::from_hex(hash).ok_or_else(|| MetainfoError::InvalidMagnet {
            reason: format!("bad hex info hash: {hash}"),
        }),
        32 => {
            let decoded = BASE32
                .decode(hash.to_uppercase().as_bytes())
                .map_err(|e| MetainfoError::InvalidMagnet {
                    reason: format!("bad base32 info hash: {e}"),
                })?;
            let digest: [u8; 20] =
                decoded
                    .try_into()
                    .map_err(|_| MetainfoError::InvalidMagnet {
                        reason: "base32 info hash is not 20 bytes".to_string(),
                    })?;
            Ok(InfoHash::from_bytes(digest))
        }
        other => Err(MetainfoError::InvalidMagnet {
            reason: format!("unexpected info hash length {other}"),
        }),
    }
}
