//! Embedded JPEG preview extraction for TIFF-based camera RAW files.
//!
//! Most RAW formats (DNG, NEF, CR2, ARW, ORF, RW2, PEF) are TIFF containers
//! whose IFDs carry one or more full JPEG renditions next to the sensor
//! data. We look for them in two places:
//!
//! - `JPEGInterchangeFormat` (0x0201) + `JPEGInterchangeFormatLength` (0x0202)
//! - a single strip (`StripOffsets` 0x0111 / `StripByteCounts` 0x0117) in an
//!   IFD whose `Compression` (0x0103) is 6 or 7 (JPEG)
//!
//! The IFD chain is walked together with every `SubIFDs` (0x014A) entry.
//! Of all candidates that start with a JPEG SOI marker, the largest wins.
//!
//! No external dependencies; every read is bounds-checked, so truncated or
//! hostile input yields `None` rather than a panic.

const TAG_COMPRESSION: u16 = 0x0103;
const TAG_STRIP_OFFSETS: u16 = 0x0111;
const TAG_STRIP_BYTE_COUNTS: u16 = 0x0117;
const TAG_SUB_IFDS: u16 = 0x014A;
const TAG_JPEG_OFFSET: u16 = 0x0201;
const TAG_JPEG_LENGTH: u16 = 0x0202;

/// Header magics: TIFF (42), Olympus ORF ("RO", "RS"), Panasonic RW2 (0x55).
const MAGICS: &[u16] = &[42, 0x4F52, 0x5352, 0x0055];

/// Guard against IFD loops in malformed files.
const MAX_IFDS: usize = 64;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Whether `data` opens with a TIFF-style header we can walk.
pub fn is_tiff_container(data: &[u8]) -> bool {
    Tiff::new(data).is_some()
}

/// Find the largest embedded JPEG in a TIFF-based RAW file.
pub fn find_embedded_jpeg(data: &[u8]) -> Option<&[u8]> {
    let tiff = Tiff::new(data)?;
    let mut best: Option<&[u8]> = None;

    let mut pending = vec![tiff.read_u32(4)? as usize];
    let mut visited = Vec::new();

    while let Some(ifd_offset) = pending.pop() {
        if ifd_offset == 0 || visited.contains(&ifd_offset) || visited.len() >= MAX_IFDS {
            continue;
        }
        visited.push(ifd_offset);

        let Some(ifd) = tiff.read_ifd(ifd_offset) else {
            continue;
        };
        pending.extend(ifd.sub_ifds.iter().copied());
        if let Some(next) = ifd.next {
            pending.push(next);
        }

        for (offset, length) in ifd.candidates() {
            let Some(jpeg) = slice(data, offset, length) else {
                continue;
            };
            if jpeg.starts_with(&JPEG_SOI) && best.is_none_or(|b| jpeg.len() > b.len()) {
                best = Some(jpeg);
            }
        }
    }

    best
}

fn slice(data: &[u8], offset: usize, length: usize) -> Option<&[u8]> {
    if length == 0 {
        return None;
    }
    data.get(offset..offset.checked_add(length)?)
}

struct Tiff<'a> {
    data: &'a [u8],
    big_endian: bool,
}

#[derive(Debug, Default)]
struct Ifd {
    compression: Option<u32>,
    strip_offset: Option<u32>,
    strip_length: Option<u32>,
    jpeg_offset: Option<u32>,
    jpeg_length: Option<u32>,
    sub_ifds: Vec<usize>,
    next: Option<usize>,
}

impl Ifd {
    /// (offset, length) pairs that may hold a JPEG stream.
    fn candidates(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        if let (Some(offset), Some(length)) = (self.jpeg_offset, self.jpeg_length) {
            out.push((offset as usize, length as usize));
        }
        if matches!(self.compression, Some(6 | 7)) {
            if let (Some(offset), Some(length)) = (self.strip_offset, self.strip_length) {
                out.push((offset as usize, length as usize));
            }
        }
        out
    }
}

impl<'a> Tiff<'a> {
    fn new(data: &'a [u8]) -> Option<Self> {
        let big_endian = match data.get(0..2)? {
            b"MM" => true,
            b"II" => false,
            _ => return None,
        };
        let tiff = Self { data, big_endian };
        MAGICS.contains(&tiff.read_u16(2)?).then_some(tiff)
    }

    fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes: [u8; 2] = self.data.get(offset..offset + 2)?.try_into().ok()?;
        Some(if self.big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        })
    }

    fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes: [u8; 4] = self.data.get(offset..offset + 4)?.try_into().ok()?;
        Some(if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    /// First value of an entry, honoring SHORT vs LONG storage.
    fn entry_value(&self, entry: usize, typ: u16) -> Option<u32> {
        match typ {
            3 => self.read_u16(entry + 8).map(u32::from),
            _ => self.read_u32(entry + 8),
        }
    }

    fn read_ifd(&self, offset: usize) -> Option<Ifd> {
        let entry_count = self.read_u16(offset)? as usize;
        let entries_start = offset + 2;
        let mut ifd = Ifd::default();

        for i in 0..entry_count {
            let entry = entries_start + i * 12;
            let tag = self.read_u16(entry)?;
            let typ = self.read_u16(entry + 2)?;
            let count = self.read_u32(entry + 4)? as usize;

            match tag {
                TAG_COMPRESSION => ifd.compression = self.entry_value(entry, typ),
                TAG_JPEG_OFFSET => ifd.jpeg_offset = self.entry_value(entry, typ),
                TAG_JPEG_LENGTH => ifd.jpeg_length = self.entry_value(entry, typ),
                // Only single-strip previews are contiguous
                TAG_STRIP_OFFSETS if count == 1 => ifd.strip_offset = self.entry_value(entry, typ),
                TAG_STRIP_BYTE_COUNTS if count == 1 => {
                    ifd.strip_length = self.entry_value(entry, typ)
                }
                TAG_SUB_IFDS => ifd.sub_ifds = self.sub_ifd_offsets(entry, count),
                _ => {}
            }
        }

        ifd.next = self
            .read_u32(entries_start + entry_count * 12)
            .map(|n| n as usize)
            .filter(|&n| n != 0);
        Some(ifd)
    }

    fn sub_ifd_offsets(&self, entry: usize, count: usize) -> Vec<usize> {
        if count == 1 {
            return self.read_u32(entry + 8).map(|o| vec![o as usize]).unwrap_or_default();
        }
        let Some(array) = self.read_u32(entry + 8) else {
            return Vec::new();
        };
        (0..count.min(MAX_IFDS))
            .filter_map(|i| self.read_u32(array as usize + i * 4))
            .map(|o| o as usize)
            .collect()
    }
}
