//! Playlist parsing into chunk references.

use std::time::Duration;

use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist, parse_playlist_res};
use tracing::{debug, warn};
use url::Url;

use super::config::VariantPolicy;
use crate::{Error, Result};

/// Byte range within a chunk URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Value for an HTTP `Range` header.
    pub fn header_value(&self) -> String {
        let end = self.offset.saturating_add(self.length).saturating_sub(1);
        format!("bytes={}-{}", self.offset, end)
    }
}

/// One fetchable chunk, ordered by `index` (the playlist media sequence number).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReference {
    pub index: u64,
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    pub duration: Duration,
}

/// A media playlist resolved to absolute chunk URLs.
#[derive(Debug, Clone)]
pub struct MediaManifest {
    pub url: Url,
    pub chunks: Vec<ChunkReference>,
    /// `#EXT-X-ENDLIST` present.
    pub ended: bool,
    pub target_duration: Duration,
}

impl MediaManifest {
    pub fn last_index(&self) -> Option<u64> {
        self.chunks.last().map(|c| c.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRef {
    pub url: Url,
    pub bandwidth: u64,
}

#[derive(Debug, Clone)]
pub enum ParsedManifest {
    Master(Vec<VariantRef>),
    Media(MediaManifest),
}

/// Parse playlist bytes fetched from `url`. Relative URIs resolve against it.
pub fn parse_manifest(url: &Url, bytes: &[u8]) -> Result<ParsedManifest> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::manifest(format!("playlist at {url} is empty")));
    }

    match parse_playlist_res(bytes) {
        Ok(Playlist::MasterPlaylist(master)) => resolve_master(url, master),
        Ok(Playlist::MediaPlaylist(media)) => Ok(ParsedManifest::Media(resolve_media(url, media)?)),
        Err(e) => Err(Error::manifest(format!(
            "failed to parse playlist at {url}: {e}"
        ))),
    }
}

fn resolve_master(url: &Url, master: MasterPlaylist) -> Result<ParsedManifest> {
    let variants: Vec<VariantRef> = master
        .variants
        .into_iter()
        .filter(|v| !v.is_i_frame)
        .filter_map(|v| match url.join(&v.uri) {
            Ok(resolved) => Some(VariantRef {
                url: resolved,
                bandwidth: v.bandwidth,
            }),
            Err(e) => {
                warn!(uri = %v.uri, error = %e, "Skipping variant with unresolvable URI");
                None
            }
        })
        .collect();

    if variants.is_empty() {
        return Err(Error::manifest(format!(
            "master playlist at {url} has no usable variants"
        )));
    }
    Ok(ParsedManifest::Master(variants))
}

/// Fails if any segment cannot be turned into a fetchable chunk.
fn resolve_media(url: &Url, media: MediaPlaylist) -> Result<MediaManifest> {
    let mut chunks = Vec::with_capacity(media.segments.len());
    // Ranges without an explicit offset continue from the previous range on the same URI.
    let mut last_range: Option<(String, u64)> = None;

    for (position, segment) in media.segments.iter().enumerate() {
        let index = media.media_sequence + position as u64;

        let uri = segment.uri.trim();
        if uri.is_empty() {
            return Err(Error::manifest(format!(
                "chunk #{index} in playlist at {url} has an empty URI"
            )));
        }
        let chunk_url = url.join(uri).map_err(|e| {
            Error::manifest(format!(
                "chunk #{index} in playlist at {url} has an unresolvable URI {uri:?}: {e}"
            ))
        })?;

        let byte_range = match &segment.byte_range {
            None => {
                last_range = None;
                None
            }
            Some(range) => {
                let offset = range.offset.or_else(|| match &last_range {
                    Some((uri, end)) if *uri == segment.uri => Some(*end),
                    _ => None,
                });
                let Some(offset) = offset else {
                    return Err(Error::manifest(format!(
                        "chunk #{index} in playlist at {url} has a byte range with no inferable offset"
                    )));
                };
                last_range = Some((segment.uri.clone(), offset.saturating_add(range.length)));
                Some(ByteRange {
                    offset,
                    length: range.length,
                })
            }
        };

        chunks.push(ChunkReference {
            index,
            url: chunk_url,
            byte_range,
            duration: Duration::try_from_secs_f32(segment.duration).unwrap_or_default(),
        });
    }

    debug!(
        %url,
        chunks = chunks.len(),
        first = media.media_sequence,
        ended = media.end_list,
        "Parsed media playlist"
    );

    Ok(MediaManifest {
        url: url.clone(),
        chunks,
        ended: media.end_list,
        target_duration: Duration::from_secs(media.target_duration),
    })
}

/// Pick a variant according to `policy`.
pub fn select_variant(variants: &[VariantRef], policy: VariantPolicy) -> Option<&VariantRef> {
    match policy {
        VariantPolicy::HighestBitrate => variants.iter().max_by_key(|v| v.bandwidth),
        VariantPolicy::LowestBitrate => variants.iter().min_by_key(|v| v.bandwidth),
        VariantPolicy::ClosestToBitrate(target) => {
            variants.iter().min_by_key(|v| v.bandwidth.abs_diff(target))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/audio/space/playlist.m3u8?type=live").unwrap()
    }

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:3
#EXT-X-MEDIA-SEQUENCE:40
#EXTINF:3.000,
chunk_40.aac
#EXTINF:3.000,
/abs/chunk_41.aac
#EXTINF:2.500,
https://other.example.com/chunk_42.aac
#EXT-X-ENDLIST
";

    #[test]
    fn media_playlist_resolves_indices_and_urls() {
        let ParsedManifest::Media(manifest) = parse_manifest(&base(), MEDIA.as_bytes()).unwrap()
        else {
            panic!("expected media playlist");
        };
        assert!(manifest.ended);
        assert_eq!(manifest.target_duration, Duration::from_secs(3));
        let indices: Vec<u64> = manifest.chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![40, 41, 42]);
        assert_eq!(
            manifest.chunks[0].url.as_str(),
            "https://cdn.example.com/audio/space/chunk_40.aac"
        );
        assert_eq!(
            manifest.chunks[1].url.as_str(),
            "https://cdn.example.com/abs/chunk_41.aac"
        );
        assert_eq!(
            manifest.chunks[2].url.as_str(),
            "https://other.example.com/chunk_42.aac"
        );
        assert_eq!(manifest.last_index(), Some(42));
    }

    #[test]
    fn master_playlist_picks_variant_by_policy() {
        let master = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=64000
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=128000
mid/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=256000
high/index.m3u8
";
        let ParsedManifest::Master(variants) = parse_manifest(&base(), master.as_bytes()).unwrap()
        else {
            panic!("expected master playlist");
        };
        let pick = |p| select_variant(&variants, p).unwrap().bandwidth;
        assert_eq!(pick(VariantPolicy::HighestBitrate), 256000);
        assert_eq!(pick(VariantPolicy::LowestBitrate), 64000);
        assert_eq!(pick(VariantPolicy::ClosestToBitrate(120000)), 128000);
        assert_eq!(
            select_variant(&variants, VariantPolicy::HighestBitrate)
                .unwrap()
                .url
                .as_str(),
            "https://cdn.example.com/audio/space/high/index.m3u8"
        );
    }

    #[test]
    fn byte_ranges_without_offset_continue_previous() {
        let playlist = "#EXTM3U
#EXT-X-TARGETDURATION:2
#EXT-X-BYTERANGE:100@0
#EXTINF:2.0,
all.aac
#EXT-X-BYTERANGE:50
#EXTINF:2.0,
all.aac
#EXT-X-ENDLIST
";
        let ParsedManifest::Media(manifest) =
            parse_manifest(&base(), playlist.as_bytes()).unwrap()
        else {
            panic!("expected media playlist");
        };
        assert_eq!(
            manifest.chunks[0].byte_range,
            Some(ByteRange {
                offset: 0,
                length: 100
            })
        );
        assert_eq!(
            manifest.chunks[1].byte_range,
            Some(ByteRange {
                offset: 100,
                length: 50
            })
        );
        assert_eq!(
            manifest.chunks[1].byte_range.unwrap().header_value(),
            "bytes=100-149"
        );
    }

    #[test]
    fn byte_range_without_inferable_offset_fails() {
        // First range on a URI has nothing to continue from.
        let playlist = "#EXTM3U
#EXT-X-TARGETDURATION:2
#EXT-X-BYTERANGE:100@0
#EXTINF:2.0,
first.aac
#EXT-X-BYTERANGE:50
#EXTINF:2.0,
second.aac
#EXT-X-ENDLIST
";
        let err = parse_manifest(&base(), playlist.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Manifest);
        assert!(err.to_string().contains("chunk #1"), "{err}");
    }

    #[test]
    fn unresolvable_chunk_uri_fails() {
        let playlist = "#EXTM3U
#EXT-X-TARGETDURATION:2
#EXTINF:2.0,
chunk_0.aac
#EXTINF:2.0,
http://[::1/chunk_1.aac
#EXTINF:2.0,
chunk_2.aac
#EXT-X-ENDLIST
";
        let err = parse_manifest(&base(), playlist.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Manifest);
        assert!(err.to_string().contains("chunk #1"), "{err}");
    }

    #[test]
    fn empty_or_garbage_is_a_manifest_error() {
        let err = parse_manifest(&base(), b"  \n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Manifest);

        let err = parse_manifest(&base(), b"<html>not a playlist</html>").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Manifest);
    }
}
