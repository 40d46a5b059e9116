//! Firmware image container parsing and selection
//!
//! An image file is a metadata block followed by the firmware payload; the
//! metadata header's size field splits the two. Three metadata revisions
//! are in the field (V1 is the legacy bare-version format; V2 adds a CRC,
//! identity strings, and card compatibility entries; V3 replaces the
//! single name with a name table). Multiple images may be shipped in one
//! "imgs" bundle, from which exactly one must match the selection
//! criteria. Payloads are either plain or DEFLATE-compressed.
//!
//! All multi-byte fields are little-endian and the on-disk structures are
//! unpadded.

use crate::error::{Error, Result};
use std::fmt;
use std::io::Read;

/// Legacy metadata magic
pub const MAGIC_V1: u32 = 0xDDB2_DDB3;
/// V2 metadata magic ("fpd1")
pub const MAGIC_V2: u32 = 0x6670_6431;
/// V3 metadata magic ("fpd2")
pub const MAGIC_V3: u32 = 0x6670_6432;
/// Multi-image bundle magic ("imgs")
pub const MAGIC_BUNDLE: u32 = 0x696D_6773;

const NAME_LEN: usize = 17;
const VERSION_STR_LEN: usize = 16;
const BUILD_TIME_LEN: usize = 24;
const BUILD_USER_LEN: usize = 12;
const MD5_LEN: usize = 16;
const PID_LEN: usize = 19;

/// Firmware version carried in metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FpdVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Debug/build number
    pub debug: u16,
}

impl fmt::Display for FpdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Card compatibility entry from V2/V3 metadata
#[derive(Debug, Clone)]
pub struct CardInfo {
    /// Product ID the image applies to; may end in `*` for a prefix match
    pub pid: String,
    /// Platform / vendor marker
    pub platform_id: u32,
    /// Minimum supported hardware revision
    pub min_hw_version: u32,
    /// Maximum supported hardware revision
    pub max_hw_version: u32,
}

impl CardInfo {
    /// Whether this entry covers `pid`, honoring a trailing `*` wildcard
    pub fn matches_pid(&self, pid: &str) -> bool {
        match self.pid.strip_suffix('*') {
            Some(prefix) => pid.starts_with(prefix),
            None => self.pid == pid,
        }
    }
}

/// How the payload is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Raw firmware bytes
    Plain,
    /// DEFLATE-compressed firmware bytes
    Deflate,
}

/// Legacy (V1) metadata: a packed version word and its format selector
#[derive(Debug, Clone, Copy)]
pub struct MetadataV1 {
    /// Selects how the version word is packed
    pub version_format: u32,
    /// Packed version word
    pub raw_version: u32,
}

impl MetadataV1 {
    /// Decode the packed version word
    ///
    /// Format 0 packs major/minor as two 16-bit halves; format 1 packs
    /// major, minor, and debug as 8/16/8 bits.
    pub fn fpd_version(&self) -> FpdVersion {
        match self.version_format {
            0 => FpdVersion {
                major: (self.raw_version & 0xFFFF) as u16,
                minor: (self.raw_version >> 16) as u16,
                debug: 0,
            },
            _ => FpdVersion {
                major: (self.raw_version & 0xFF) as u16,
                minor: ((self.raw_version >> 8) & 0xFFFF) as u16,
                debug: ((self.raw_version >> 24) & 0xFF) as u16,
            },
        }
    }
}

/// V2/V3 metadata body
#[derive(Debug, Clone)]
pub struct MetadataBody {
    /// Vendor-defined flags
    pub user_flags: u32,
    /// FPD names this image serves (one for V2, a table for V3)
    pub names: Vec<String>,
    /// Firmware version
    pub version: FpdVersion,
    /// Human-readable version string
    pub version_str: String,
    /// Build timestamp string
    pub build_time: String,
    /// Build user string
    pub build_user: String,
    /// Payload storage kind
    pub payload_kind: PayloadKind,
    /// Uncompressed payload size in bytes
    pub payload_size: u32,
    /// MD5 digest of the uncompressed payload
    pub payload_md5: [u8; MD5_LEN],
    /// Card compatibility entries
    pub cards: Vec<CardInfo>,
}

/// Parsed metadata of any revision
#[derive(Debug, Clone)]
pub enum Metadata {
    /// Legacy bare-version metadata
    V1(MetadataV1),
    /// V2 metadata
    V2(MetadataBody),
    /// V3 metadata
    V3(MetadataBody),
}

impl Metadata {
    /// Firmware version, whichever revision carries it
    pub fn fpd_version(&self) -> FpdVersion {
        match self {
            Metadata::V1(m) => m.fpd_version(),
            Metadata::V2(m) | Metadata::V3(m) => m.version,
        }
    }

    /// V2/V3 body, if this is not legacy metadata
    pub fn body(&self) -> Option<&MetadataBody> {
        match self {
            Metadata::V1(_) => None,
            Metadata::V2(m) | Metadata::V3(m) => Some(m),
        }
    }
}

/// Cursor over little-endian unpadded structures
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::CorruptImage(format!(
                "truncated metadata: wanted {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.bytes.len()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self, n: usize) -> Result<String> {
        let raw = self.take(n)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

/// Split an image file into its metadata and payload parts
///
/// The metadata header's size field is the authority on where the payload
/// starts.
pub fn split_image(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let mut r = Reader::new(bytes);
    let magic = r.u32()?;
    if !matches!(magic, MAGIC_V1 | MAGIC_V2 | MAGIC_V3) {
        return Err(Error::CorruptImage(format!(
            "bad metadata magic 0x{:08X}",
            magic
        )));
    }
    let _version = r.u8()?;
    let metadata_size = r.u16()? as usize;
    if metadata_size > bytes.len() || metadata_size < r.pos {
        return Err(Error::CorruptImage(format!(
            "metadata size {} inconsistent with {} byte file",
            metadata_size,
            bytes.len()
        )));
    }
    Ok((&bytes[..metadata_size], &bytes[metadata_size..]))
}

/// Parse a metadata block of any revision
pub fn parse_metadata(mdata: &[u8]) -> Result<Metadata> {
    let mut r = Reader::new(mdata);
    let magic = r.u32()?;
    let _version = r.u8()?;
    let metadata_size = r.u16()? as usize;
    if metadata_size > mdata.len() {
        return Err(Error::CorruptImage(format!(
            "metadata size {} exceeds the {} bytes supplied",
            metadata_size,
            mdata.len()
        )));
    }

    match magic {
        MAGIC_V1 => {
            let version_format = r.u32()?;
            let raw_version = r.u32()?;
            Ok(Metadata::V1(MetadataV1 {
                version_format,
                raw_version,
            }))
        }
        MAGIC_V2 | MAGIC_V3 => {
            let crc = r.u32()?;
            let body_start = r.pos;
            let computed = crc32fast::hash(&mdata[body_start..metadata_size]);
            if computed != crc {
                return Err(Error::CorruptImage(format!(
                    "metadata CRC mismatch: header 0x{:08X}, computed 0x{:08X}",
                    crc, computed
                )));
            }

            let user_flags = r.u32()?;
            let mut names = Vec::new();
            if magic == MAGIC_V2 {
                names.push(r.string(NAME_LEN)?);
            }
            let version = FpdVersion {
                major: r.u16()?,
                minor: r.u16()?,
                debug: r.u16()?,
            };
            let version_str = r.string(VERSION_STR_LEN)?;
            let build_time = r.string(BUILD_TIME_LEN)?;
            let build_user = r.string(BUILD_USER_LEN)?;
            // Stored as a 32-bit enum, like the flags word
            let payload_kind = match r.u32()? {
                0 => PayloadKind::Plain,
                1 => PayloadKind::Deflate,
                other => {
                    return Err(Error::CorruptImage(format!(
                        "unknown payload kind {}",
                        other
                    )))
                }
            };
            let payload_size = r.u32()?;
            let mut payload_md5 = [0u8; MD5_LEN];
            payload_md5.copy_from_slice(r.take(MD5_LEN)?);

            let _card_info_version = r.u8()?;
            let card_count = r.u8()?;
            let mut cards = Vec::with_capacity(card_count as usize);
            for _ in 0..card_count {
                cards.push(CardInfo {
                    pid: r.string(PID_LEN)?,
                    platform_id: r.u32()?,
                    min_hw_version: r.u32()?,
                    max_hw_version: r.u32()?,
                });
            }

            if magic == MAGIC_V3 {
                let name_count = r.u8()?;
                for _ in 0..name_count {
                    names.push(r.string(NAME_LEN)?);
                }
            }

            let body = MetadataBody {
                user_flags,
                names,
                version,
                version_str,
                build_time,
                build_user,
                payload_kind,
                payload_size,
                payload_md5,
                cards,
            };
            Ok(if magic == MAGIC_V2 {
                Metadata::V2(body)
            } else {
                Metadata::V3(body)
            })
        }
        other => Err(Error::CorruptImage(format!(
            "bad metadata magic 0x{:08X}",
            other
        ))),
    }
}

/// Split a file into its constituent images
///
/// A bundle ("imgs") yields its members; anything else is treated as a
/// single image.
pub fn images(bytes: &[u8]) -> Result<Vec<&[u8]>> {
    let mut r = Reader::new(bytes);
    let Ok(magic) = r.u32() else {
        return Err(Error::CorruptImage("file too short".into()));
    };
    if magic != MAGIC_BUNDLE {
        return Ok(vec![bytes]);
    }

    let _bundle_version = r.u16()?;
    let image_count = r.u16()?;
    let header_size = r.u32()? as usize;
    let mut sizes = Vec::with_capacity(image_count as usize);
    for _ in 0..image_count {
        sizes.push(r.u32()? as usize);
    }
    if r.pos > header_size || header_size > bytes.len() {
        return Err(Error::CorruptImage(format!(
            "bundle header size {} inconsistent",
            header_size
        )));
    }
    let total: usize = sizes.iter().sum();
    if header_size + total > bytes.len() {
        return Err(Error::CorruptImage(format!(
            "bundle claims {} image bytes but only {} follow the header",
            total,
            bytes.len() - header_size
        )));
    }

    let mut out = Vec::with_capacity(sizes.len());
    let mut pos = header_size;
    for size in sizes {
        out.push(&bytes[pos..pos + size]);
        pos += size;
    }
    Ok(out)
}

/// Decompress (or pass through) a payload according to its metadata
pub fn payload_data(body: &MetadataBody, payload: &[u8]) -> Result<Vec<u8>> {
    let data = match body.payload_kind {
        PayloadKind::Plain => payload.to_vec(),
        PayloadKind::Deflate => {
            let mut out = Vec::with_capacity(body.payload_size as usize);
            flate2::read::DeflateDecoder::new(payload)
                .read_to_end(&mut out)
                .map_err(|e| Error::DecompressionFailed(e.to_string()))?;
            out
        }
    };
    if data.len() != body.payload_size as usize {
        return Err(Error::CorruptImage(format!(
            "payload is {} bytes, metadata says {}",
            data.len(),
            body.payload_size
        )));
    }
    Ok(data)
}

/// What to match an image against
///
/// Every provided criterion must hold; with no criteria at all, every
/// image matches and only the exactly-one rule narrows the field.
#[derive(Debug, Default, Clone)]
pub struct SelectionCriteria<'a> {
    /// Product ID of the card being programmed
    pub pid: Option<&'a str>,
    /// FPD name token
    pub name: Option<&'a str>,
    /// Vendor marker: a second name token that must also appear in the
    /// image's name list
    pub vendor_marker: Option<&'a str>,
}

impl SelectionCriteria<'_> {
    /// Whether no criterion was provided
    pub fn is_empty(&self) -> bool {
        self.pid.is_none() && self.name.is_none() && self.vendor_marker.is_none()
    }

    fn matches(&self, metadata: &Metadata) -> bool {
        if self.is_empty() {
            return true;
        }
        let Some(body) = metadata.body() else {
            // Legacy images carry no identity to match on
            return false;
        };
        if let Some(pid) = self.pid {
            // An empty compatibility list means the image fits any card
            if !body.cards.is_empty() && !body.cards.iter().any(|c| c.matches_pid(pid)) {
                return false;
            }
        }
        for token in [self.name, self.vendor_marker].into_iter().flatten() {
            if !body.names.iter().any(|n| n == token) {
                return false;
            }
        }
        true
    }
}

/// Short identity string used in selection diagnostics
fn describe(metadata: &Metadata) -> String {
    match metadata.body() {
        Some(body) => {
            let mut s = format!("{} {}", body.names.join("/"), body.version);
            if !body.cards.is_empty() {
                let pids: Vec<&str> = body.cards.iter().map(|c| c.pid.as_str()).collect();
                s.push_str(&format!(" [{}]", pids.join(",")));
            }
            s
        }
        None => format!("legacy {}", metadata.fpd_version()),
    }
}

/// Pick the single image matching the criteria
///
/// Exactly one image must match: zero matches and multiple matches are
/// both errors, so a bundle can never silently program the wrong
/// firmware. Both error cases name the images involved.
pub fn select_image<'a>(
    images: &[&'a [u8]],
    criteria: &SelectionCriteria<'_>,
) -> Result<(&'a [u8], Metadata)> {
    let mut matched = Vec::new();
    let mut considered = Vec::new();
    for image in images {
        let (mdata, _) = split_image(image)?;
        let metadata = parse_metadata(mdata)?;
        considered.push(describe(&metadata));
        if criteria.matches(&metadata) {
            matched.push((*image, metadata));
        }
    }
    match matched.len() {
        1 => Ok(matched.pop().expect("one element")),
        0 => Err(Error::SelectionNotFound(considered)),
        _ => Err(Error::SelectionAmbiguous(
            matched.iter().map(|(_, m)| describe(m)).collect(),
        )),
    }
}

/// Version of the firmware packaged in an image file
pub fn packaged_version(image: &[u8]) -> Result<FpdVersion> {
    let (mdata, _) = split_image(image)?;
    Ok(parse_metadata(mdata)?.fpd_version())
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    fn ver(major: u16, minor: u16) -> FpdVersion {
        FpdVersion {
            major,
            minor,
            debug: 0,
        }
    }

    #[test]
    fn v1_version_formats() {
        let img = build_v1(0, 0x0003_0001, b"x");
        let v = packaged_version(&img).unwrap();
        assert_eq!((v.major, v.minor), (1, 3));

        let img = build_v1(1, 0x0500_0201, b"x");
        let v = packaged_version(&img).unwrap();
        assert_eq!((v.major, v.minor, v.debug), (1, 2, 5));
    }

    #[test]
    fn v2_round_trip() {
        let img = ImageBuilder::v2("iofpga", ver(4, 7))
            .card("ABC-123", 0x42)
            .build();
        let (mdata, payload) = split_image(&img).unwrap();
        let metadata = parse_metadata(mdata).unwrap();
        let body = metadata.body().unwrap();
        assert_eq!(body.names, vec!["iofpga"]);
        assert_eq!(metadata.fpd_version(), ver(4, 7));
        assert_eq!(body.cards.len(), 1);
        assert_eq!(body.cards[0].platform_id, 0x42);
        assert_eq!(payload_data(body, payload).unwrap(), b"firmware-payload");
    }

    #[test]
    fn v3_carries_a_name_table() {
        let img = ImageBuilder::v3(&["iofpga", "iofpga-lc"], ver(1, 0)).build();
        let (mdata, _) = split_image(&img).unwrap();
        let metadata = parse_metadata(mdata).unwrap();
        assert_eq!(
            metadata.body().unwrap().names,
            vec!["iofpga", "iofpga-lc"]
        );
    }

    #[test]
    fn crc_mismatch_is_corrupt() {
        let img = ImageBuilder::v2("iofpga", ver(1, 0)).corrupt_crc().build();
        let (mdata, _) = split_image(&img).unwrap();
        assert!(matches!(
            parse_metadata(mdata),
            Err(Error::CorruptImage(_))
        ));
    }

    #[test]
    fn truncated_metadata_is_corrupt() {
        let img = ImageBuilder::v2("iofpga", ver(1, 0)).build();
        let (mdata, _) = split_image(&img).unwrap();
        assert!(matches!(
            parse_metadata(&mdata[..mdata.len() - 3]),
            Err(Error::CorruptImage(_))
        ));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut img = ImageBuilder::v2("iofpga", ver(1, 0)).build();
        img[0] ^= 0xFF;
        assert!(matches!(split_image(&img), Err(Error::CorruptImage(_))));
    }

    #[test]
    fn deflate_payload_round_trips() {
        let firmware: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let img = ImageBuilder::v2("iofpga", ver(1, 0))
            .payload(&firmware)
            .deflate()
            .build();
        let (mdata, payload) = split_image(&img).unwrap();
        let metadata = parse_metadata(mdata).unwrap();
        let body = metadata.body().unwrap();
        assert_eq!(body.payload_kind, PayloadKind::Deflate);
        assert!(payload.len() < firmware.len());
        assert_eq!(payload_data(body, payload).unwrap(), firmware);
    }

    #[test]
    fn garbage_deflate_fails_decompression() {
        let img = ImageBuilder::v2("iofpga", ver(1, 0))
            .payload(b"real")
            .deflate()
            .build();
        let (mdata, _) = split_image(&img).unwrap();
        let body_meta = parse_metadata(mdata).unwrap();
        let garbage = [0x00u8, 0x11, 0x22, 0x33];
        assert!(matches!(
            payload_data(body_meta.body().unwrap(), &garbage),
            Err(Error::DecompressionFailed(_) | Error::CorruptImage(_))
        ));
    }

    #[test]
    fn bundle_unpacks_members() {
        let a = ImageBuilder::v2("alpha", ver(1, 0)).build();
        let b = ImageBuilder::v2("beta", ver(2, 0)).build();
        let bundle = build_bundle(&[&a, &b]);
        let members = images(&bundle).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0], &a[..]);
        assert_eq!(members[1], &b[..]);
    }

    #[test]
    fn plain_file_is_a_single_image() {
        let a = ImageBuilder::v2("alpha", ver(1, 0)).build();
        let members = images(&a).unwrap();
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn bundle_with_lying_sizes_is_corrupt() {
        let a = ImageBuilder::v2("alpha", ver(1, 0)).build();
        let mut bundle = build_bundle(&[&a]);
        let truncated = bundle.len() - 10;
        bundle.truncate(truncated);
        assert!(matches!(images(&bundle), Err(Error::CorruptImage(_))));
    }

    #[test]
    fn selection_requires_exactly_one_match() {
        let a = ImageBuilder::v2("alpha", ver(1, 0))
            .card("PID-A", 1)
            .build();
        let b = ImageBuilder::v2("beta", ver(2, 0)).card("PID-B", 2).build();
        let members = vec![&a[..], &b[..]];

        let (img, metadata) = select_image(
            &members,
            &SelectionCriteria {
                pid: Some("PID-B"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(img, &b[..]);
        assert_eq!(metadata.fpd_version(), ver(2, 0));

        match select_image(
            &members,
            &SelectionCriteria {
                pid: Some("PID-C"),
                ..Default::default()
            },
        ) {
            Err(Error::SelectionNotFound(considered)) => {
                // Diagnostics name every candidate that was looked at
                assert_eq!(considered.len(), 2);
                assert!(considered[0].contains("alpha"));
                assert!(considered[1].contains("beta"));
            }
            other => panic!("expected SelectionNotFound, got {:?}", other.err()),
        }
    }

    #[test]
    fn ambiguous_selection_names_the_matches() {
        let a = ImageBuilder::v2("alpha", ver(1, 0)).card("PID-*", 1).build();
        let b = ImageBuilder::v2("beta", ver(2, 0)).card("PID-B", 1).build();
        let members = vec![&a[..], &b[..]];
        match select_image(
            &members,
            &SelectionCriteria {
                pid: Some("PID-B"),
                ..Default::default()
            },
        ) {
            Err(Error::SelectionAmbiguous(matched)) => {
                assert_eq!(matched.len(), 2);
                assert!(matched[0].contains("alpha"));
                assert!(matched[1].contains("beta"));
            }
            other => panic!("expected SelectionAmbiguous, got {:?}", other.err()),
        }
    }

    #[test]
    fn empty_card_list_matches_any_pid() {
        let listed = ImageBuilder::v2("alpha", ver(1, 0)).card("N1", 1).build();
        let universal = ImageBuilder::v2("beta", ver(2, 0)).build();
        let members = vec![&listed[..], &universal[..]];
        let (img, _) = select_image(
            &members,
            &SelectionCriteria {
                pid: Some("N2"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(img, &universal[..]);
    }

    #[test]
    fn pid_wildcard_prefix_matches() {
        let a = ImageBuilder::v2("alpha", ver(1, 0))
            .card("NCS-55A1-*", 7)
            .build();
        let members = vec![&a[..]];
        assert!(select_image(
            &members,
            &SelectionCriteria {
                pid: Some("NCS-55A1-24H"),
                ..Default::default()
            }
        )
        .is_ok());
    }

    #[test]
    fn selection_by_name_and_marker() {
        // The vendor marker is a second name token; both tokens must
        // appear in the image's name list
        let a = ImageBuilder::v3(&["iofpga", "acme"], ver(1, 0))
            .card("PID-A", 0x10)
            .build();
        let b = ImageBuilder::v3(&["iofpga", "initech"], ver(1, 0))
            .card("PID-A", 0x20)
            .build();
        let members = vec![&a[..], &b[..]];

        let (img, _) = select_image(
            &members,
            &SelectionCriteria {
                name: Some("iofpga"),
                vendor_marker: Some("acme"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(img, &a[..]);

        let (img, _) = select_image(
            &members,
            &SelectionCriteria {
                vendor_marker: Some("initech"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(img, &b[..]);
    }

    #[test]
    fn empty_criteria_match_everything() {
        let a = ImageBuilder::v2("alpha", ver(1, 0)).build();
        let only = vec![&a[..]];
        let (img, _) = select_image(&only, &SelectionCriteria::default()).unwrap();
        assert_eq!(img, &a[..]);

        let b = ImageBuilder::v2("beta", ver(2, 0)).build();
        let both = vec![&a[..], &b[..]];
        assert!(matches!(
            select_image(&both, &SelectionCriteria::default()),
            Err(Error::SelectionAmbiguous(_))
        ));
    }

    #[test]
    fn unknown_payload_kind_is_corrupt() {
        let img = ImageBuilder::v2("iofpga", ver(1, 0))
            .payload_kind_raw(7)
            .build();
        let (mdata, _) = split_image(&img).unwrap();
        assert!(matches!(
            parse_metadata(mdata),
            Err(Error::CorruptImage(_))
        ));
    }
}
