//! FLAT motion archives.
//!
//! A sectioned container: optional `ELNA` XOR key marker, mandatory `FLAT`
//! header (32-byte v1 or 64-byte v2 layout, told apart by section size),
//! optional `TMNL`, mandatory `MTLC` (timelines, zlib-compressed when the
//! header version is 4 or later), mandatory `LIBL` (named libraries whose
//! payload is CG data, a memory blob, a nested timeline list, a stop-motion
//! descriptor or a particle-emitter descriptor) and optional `TALT`
//! (alpha-JPEG entries with metadata records). The LIBL entries double as
//! archive entries so FLAT files sit behind the common [`Archive`] trait.

use std::borrow::Cow;
use std::fs;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;
use tracing::warn;

use super::{Archive, ArchiveFlags, Entry};
use crate::buffer::Reader;
use crate::string::SjisString;
use crate::{Error, Result, encoding, zlib};

#[derive(Debug, Clone, Copy, Default)]
pub struct FlatSection {
    pub present: bool,
    pub off: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatHeaderKind {
    V1_32,
    V2_64,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct FlatHeader {
    pub present: bool,
    pub kind: FlatHeaderKind,
    pub version: i32,
    pub fps: i32,
    pub game_view_width: i32,
    pub game_view_height: i32,
    pub camera_length: f32,
    pub meter: f32,
    pub width: i32,
    pub height: i32,
    pub uk1: i32,
}

impl Default for FlatHeader {
    fn default() -> Self {
        FlatHeader {
            present: false,
            kind: FlatHeaderKind::Unknown,
            version: 0,
            fps: 0,
            game_view_width: 0,
            game_view_height: 0,
            camera_length: 0.0,
            meter: 0.0,
            width: 0,
            height: 0,
            uk1: 0,
        }
    }
}

/// Positions were stored as ints up to header version 4, floats after.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyPos {
    Int { x: i32, y: i32 },
    Float { x: f32, y: f32 },
}

/// One graphic-timeline keyframe. Unknown fields are preserved verbatim.
#[derive(Debug, Clone)]
pub struct GraphicKey {
    pub pos: KeyPos,
    pub scale_x: f32,
    pub scale_y: f32,
    pub angle_x: f32,
    pub angle_y: f32,
    pub angle_z: f32,
    pub add_r: i32,
    pub add_g: i32,
    pub add_b: i32,
    pub mul_r: i32,
    pub mul_g: i32,
    pub mul_b: i32,
    pub alpha: i32,
    pub area_x: i32,
    pub area_y: i32,
    pub area_width: i32,
    pub area_height: i32,
    pub draw_filter: i32,
    pub uk1: i32,
    pub origin_x: i32,
    pub origin_y: i32,
    pub uk2: i32,
    pub reverse_tb: bool,
    pub reverse_lr: bool,
}

/// One script-timeline key: per-frame text with jump/stop sub-ops, parsed
/// from a 0-terminated operation list.
#[derive(Debug, Clone)]
pub struct ScriptKey {
    pub frame_index: i32,
    pub has_jump: bool,
    pub jump_frame: i32,
    pub is_stop: bool,
    pub text: Option<SjisString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineKind {
    Graphic = 0,
    Script = 1,
    Sound = 2,
}

#[derive(Debug, Clone)]
pub enum TimelineContent {
    /// One key per frame (header version < 15).
    GraphicKeys(Vec<GraphicKey>),
    /// Per-frame key lists (header version >= 15).
    GraphicFrames(Vec<Vec<GraphicKey>>),
    Script(Vec<ScriptKey>),
}

#[derive(Debug, Clone)]
pub struct Timeline {
    pub name: SjisString,
    pub library_name: SjisString,
    pub kind: TimelineKind,
    pub begin_frame: i32,
    pub frame_count: i32,
    pub content: TimelineContent,
}

#[derive(Debug, Clone)]
pub struct StopMotion {
    pub library_name: SjisString,
    pub span: i32,
    pub loop_type: i32,
}

/// Particle emitter descriptor. The field schedule is version dependent
/// and every field, deciphered or not, round-trips.
#[derive(Debug, Clone, Default)]
pub struct Emitter {
    pub library_name: SjisString,
    pub uk_int1: i32,
    pub create_pos_type: i32,
    pub create_pos_length: f32,
    pub create_pos_length2: f32,
    pub create_count: i32,
    pub particle_length: i32,
    pub begin_size_rate: f32,
    pub uk1_size_rate: f32,
    pub end_size_rate: f32,
    pub uk2_size_rate: f32,
    pub begin_x_size_rate: f32,
    pub uk1_x_size_rate: f32,
    pub end_x_size_rate: f32,
    pub uk2_x_size_rate: f32,
    pub begin_y_size_rate: f32,
    pub uk1_y_size_rate: f32,
    pub end_y_size_rate: f32,
    pub uk2_y_size_rate: f32,
    pub uk_bool1: bool,
    pub direction_type: i32,
    pub direction_x: f32,
    pub direction_y: f32,
    pub direction_z: f32,
    pub direction_angle: f32,
    pub is_emitter_connect_type: bool,
    pub uk_int2: i32,
    pub uk_int3: i32,
    pub uk_int4: i32,
    pub uk_int5: i32,
    pub uk_int6: i32,
    pub uk_int7: i32,
    pub uk_int8: i32,
    pub uk_int9: i32,
    pub uk_int10: i32,
    pub uk_int11: i32,
    pub speed: f32,
    pub speed_rate: f32,
    pub move_length: f32,
    pub mobe_curve: f32,
    pub uk_float1: f32,
    pub is_fall: bool,
    pub width: f32,
    pub air_resistance: f32,
    pub uk_bool2: bool,
    pub begin_x_angle: f32,
    pub uk1_x_angle: f32,
    pub end_x_angle: f32,
    pub uk2_x_angle: f32,
    pub begin_y_angle: f32,
    pub uk1_y_angle: f32,
    pub end_y_angle: f32,
    pub uk2_y_angle: f32,
    pub begin_z_angle: f32,
    pub uk1_z_angle: f32,
    pub end_z_angle: f32,
    pub uk2_z_angle: f32,
    pub uk_bool3: bool,
    pub fade_in_frame: i32,
    pub fade_out_frame: i32,
    pub draw_filter_type: i32,
    pub rand_base: i32,
    pub end_pos_type: i32,
    pub end_pos_x: f32,
    pub end_pos_y: f32,
    pub end_pos_z: f32,
    pub end_cg_name: SjisString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryKind {
    Cg = 2,
    Timeline = 3,
    StopMotion = 4,
    Memory = 5,
    Emitter = 6,
}

impl LibraryKind {
    fn from_i32(v: i32) -> Option<LibraryKind> {
        match v {
            2 => Some(LibraryKind::Cg),
            3 => Some(LibraryKind::Timeline),
            4 => Some(LibraryKind::StopMotion),
            5 => Some(LibraryKind::Memory),
            6 => Some(LibraryKind::Emitter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LibraryContent {
    /// Raw CG bytes at `(off, size)` within the file data.
    Cg { off: usize, size: usize },
    /// Uninterpreted memory blob.
    Memory { off: usize, size: usize },
    Timelines(Vec<Timeline>),
    StopMotion(StopMotion),
    Emitter(Emitter),
}

#[derive(Debug, Clone)]
pub struct Library {
    pub name: SjisString,
    pub kind: LibraryKind,
    pub content: LibraryContent,
}

#[derive(Debug, Clone)]
pub struct TaltMetadata {
    pub unknown1_off: usize,
    pub unknown1_size: usize,
    pub unknown2: i32,
    pub unknown3: i32,
    pub unknown4: i32,
    pub unknown5: i32,
}

/// One `TALT` record: AJP bytes at `(off, size)` plus metadata records.
#[derive(Debug, Clone)]
pub struct TaltEntry {
    pub off: usize,
    pub size: usize,
    pub metadata: Vec<TaltMetadata>,
}

#[derive(Debug)]
enum FlatData {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for FlatData {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            FlatData::Owned(v) => v,
            FlatData::Mapped(m) => m,
        }
    }
}

#[derive(Debug)]
pub struct FlatArchive {
    data: FlatData,

    // file map
    pub elna: FlatSection,
    pub flat: FlatSection,
    pub tmnl: FlatSection,
    pub mtlc: FlatSection,
    pub libl: FlatSection,
    pub talt: FlatSection,

    pub hdr: FlatHeader,
    pub timelines: Vec<Timeline>,
    pub libraries: Vec<Library>,
    pub talt_entries: Vec<TaltEntry>,
}

fn read_flat_string(r: &mut Reader<'_>) -> Result<SjisString> {
    let len = r.i32()?;
    if len < 0 || r.remaining() < len as usize {
        return Err(Error::invalid(format!("invalid string length {len}")));
    }
    let s = SjisString::from_bytes(r.bytes(len as usize)?);
    r.align(4);
    Ok(s)
}

fn parse_graphic_key(r: &mut Reader<'_>, version: i32) -> Result<GraphicKey> {
    let pos = if version <= 4 {
        KeyPos::Int {
            x: r.i32()?,
            y: r.i32()?,
        }
    } else {
        KeyPos::Float {
            x: r.f32()?,
            y: r.f32()?,
        }
    };
    Ok(GraphicKey {
        pos,
        scale_x: r.f32()?,
        scale_y: r.f32()?,
        angle_x: r.f32()?,
        angle_y: r.f32()?,
        angle_z: r.f32()?,
        add_r: r.i32()?,
        add_g: r.i32()?,
        add_b: r.i32()?,
        mul_r: r.i32()?,
        mul_g: r.i32()?,
        mul_b: r.i32()?,
        alpha: r.i32()?,
        area_x: r.i32()?,
        area_y: r.i32()?,
        area_width: r.i32()?,
        area_height: r.i32()?,
        draw_filter: r.i32()?,
        uk1: if version > 8 { r.i32()? } else { 0 },
        origin_x: r.i32()?,
        origin_y: r.i32()?,
        uk2: if version > 7 { r.i32()? } else { 0 },
        reverse_tb: r.i32()? != 0,
        reverse_lr: r.i32()? != 0,
    })
}

fn graphic_key_data_size(version: i32) -> usize {
    let mut sz = 92;
    if version > 7 {
        sz += 4;
    }
    if version > 8 {
        sz += 4;
    }
    sz
}

fn read_graphic_tl(r: &mut Reader<'_>, frame_count: i32, version: i32) -> Result<TimelineContent> {
    if frame_count <= 0 {
        warn!("Timeline has no frames");
        return Ok(TimelineContent::GraphicKeys(Vec::new()));
    }
    let ksz = graphic_key_data_size(version);

    if version < 15 {
        let mut keys = Vec::with_capacity(frame_count as usize);
        for i in 0..frame_count as usize {
            if r.remaining() < ksz {
                warn!("Not enough data for graphic key {i}/{frame_count}");
                break;
            }
            keys.push(parse_graphic_key(r, version)?);
        }
        return Ok(TimelineContent::GraphicKeys(keys));
    }

    let mut frames = Vec::with_capacity(frame_count as usize);
    for f in 0..frame_count as usize {
        let mut n = r.u32()? as usize;
        if r.remaining() < n * ksz {
            warn!(
                "Frame {f} declares {n} keys but only {} bytes remain; truncating",
                r.remaining()
            );
            n = r.remaining() / ksz;
        }
        let mut keys = Vec::with_capacity(n);
        for _ in 0..n {
            keys.push(parse_graphic_key(r, version)?);
        }
        frames.push(keys);
    }
    Ok(TimelineContent::GraphicFrames(frames))
}

fn parse_script_key(r: &mut Reader<'_>) -> Result<ScriptKey> {
    let mut key = ScriptKey {
        frame_index: r.i32()?,
        has_jump: false,
        jump_frame: -1,
        is_stop: false,
        text: None,
    };
    loop {
        match r.i32()? {
            0 => return Ok(key),
            1 => {
                key.has_jump = true;
                key.jump_frame = r.i32()?;
            }
            2 => key.is_stop = true,
            3 => key.text = Some(read_flat_string(r)?),
            op => return Err(Error::invalid(format!("unknown script key operation {op}"))),
        }
    }
}

fn read_script_tl(r: &mut Reader<'_>) -> Result<TimelineContent> {
    let count = r.u32()? as usize;
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        keys.push(parse_script_key(r)?);
    }
    Ok(TimelineContent::Script(keys))
}

fn parse_timeline(r: &mut Reader<'_>, version: i32) -> Result<Option<Timeline>> {
    let name = read_flat_string(r)?;
    let library_name = read_flat_string(r)?;
    let kind = r.i32()?;
    let begin_frame = r.i32()?;
    let frame_count = r.i32()?;

    let (kind, content) = match kind {
        0 => (
            TimelineKind::Graphic,
            read_graphic_tl(r, frame_count, version)?,
        ),
        1 => (TimelineKind::Script, read_script_tl(r)?),
        2 => {
            warn!("Unimplemented timeline SOUND");
            return Ok(None);
        }
        other => {
            warn!("Unknown MTLC timeline type {other}");
            return Ok(None);
        }
    };

    Ok(Some(Timeline {
        name,
        library_name,
        kind,
        begin_frame,
        frame_count,
        content,
    }))
}

fn parse_timelines(data: &[u8], version: i32) -> Result<Vec<Timeline>> {
    let inflated;
    let mut r = Reader::new(data);
    // compressed from header version 4
    if version >= 4 {
        let uncompressed_size = r.u32()? as usize;
        inflated = zlib::inflate(r.data(), uncompressed_size)?;
        r = Reader::new(&inflated);
    }

    let count = r.u32()? as usize;
    let mut timelines = Vec::with_capacity(count);
    for i in 0..count {
        match parse_timeline(&mut r, version) {
            Ok(Some(tl)) => timelines.push(tl),
            Ok(None) | Err(_) => {
                warn!("Failed to parse timeline {i}");
                break;
            }
        }
    }
    Ok(timelines)
}

fn parse_stop_motion(r: &mut Reader<'_>) -> Result<StopMotion> {
    Ok(StopMotion {
        library_name: read_flat_string(r)?,
        span: r.i32()?,
        loop_type: r.i32()?,
    })
}

fn parse_emitter(r: &mut Reader<'_>, version: i32) -> Result<Emitter> {
    let mut em = Emitter {
        library_name: read_flat_string(r)?,
        ..Emitter::default()
    };
    em.uk_int1 = if version > 0 { r.i32()? } else { 5 };
    em.create_pos_type = r.i32()?;
    em.create_pos_length = r.f32()?;
    em.create_pos_length2 = r.f32()?;
    em.create_count = r.i32()?;
    em.particle_length = r.i32()?;
    em.begin_size_rate = r.f32()?;
    if version < 1 {
        em.end_size_rate = r.f32()?;
        em.begin_x_size_rate = r.f32()?;
        em.end_x_size_rate = r.f32()?;
        em.begin_y_size_rate = r.f32()?;
        em.end_y_size_rate = r.f32()?;
    } else {
        em.uk1_size_rate = r.f32()?;
        em.end_size_rate = r.f32()?;
        em.uk2_size_rate = r.f32()?;
        em.begin_x_size_rate = r.f32()?;
        em.uk1_x_size_rate = r.f32()?;
        em.end_x_size_rate = r.f32()?;
        em.uk2_x_size_rate = r.f32()?;
        em.begin_y_size_rate = r.f32()?;
        em.uk1_y_size_rate = r.f32()?;
        em.end_y_size_rate = r.f32()?;
        em.uk2_y_size_rate = r.f32()?;
        if version > 5 {
            em.uk_bool1 = r.i32()? != 0;
        }
    }
    em.direction_type = r.i32()?;
    em.direction_x = r.f32()?;
    em.direction_y = r.f32()?;
    em.direction_z = r.f32()?;
    em.direction_angle = r.f32()?;
    em.is_emitter_connect_type = r.i32()? != 0;
    if version > 2 {
        em.uk_int2 = r.i32()?;
    }
    if version > 9 {
        em.uk_int3 = r.i32()?;
    }
    if version > 1 {
        em.uk_int4 = r.i32()?;
        em.uk_int5 = r.i32()?;
        em.uk_int6 = r.i32()?;
        em.uk_int7 = r.i32()?;
        em.uk_int8 = r.i32()?;
        em.uk_int9 = r.i32()?;
        em.uk_int10 = r.i32()?;
        em.uk_int11 = r.i32()?;
    }
    em.speed = r.f32()?;
    em.speed_rate = r.f32()?;
    em.move_length = r.f32()?;
    em.mobe_curve = r.f32()?;
    if version > 1 {
        em.uk_float1 = r.f32()?;
    }
    em.is_fall = r.i32()? != 0;
    em.width = r.f32()?;
    em.air_resistance = r.f32()?;
    if version > 1 {
        em.uk_bool2 = r.i32()? != 0;
    }
    em.begin_x_angle = r.f32()?;
    if version < 1 {
        em.end_x_angle = r.f32()?;
        em.begin_y_angle = r.f32()?;
        em.end_y_angle = r.f32()?;
        em.begin_z_angle = r.f32()?;
        em.end_z_angle = r.f32()?;
    } else {
        em.uk1_x_angle = r.f32()?;
        em.end_x_angle = r.f32()?;
        em.uk2_x_angle = r.f32()?;
        em.begin_y_angle = r.f32()?;
        em.uk1_y_angle = r.f32()?;
        em.end_y_angle = r.f32()?;
        em.uk2_y_angle = r.f32()?;
        em.begin_z_angle = r.f32()?;
        em.uk1_z_angle = r.f32()?;
        em.end_z_angle = r.f32()?;
        em.uk2_z_angle = r.f32()?;
        if version > 5 {
            em.uk_bool3 = r.i32()? != 0;
        }
    }
    em.fade_in_frame = r.i32()?;
    em.fade_out_frame = r.i32()?;
    em.draw_filter_type = r.i32()?;
    em.rand_base = r.i32()?;
    em.end_pos_type = r.i32()?;
    em.end_pos_x = r.f32()?;
    em.end_pos_y = r.f32()?;
    em.end_pos_z = r.f32()?;
    em.end_cg_name = read_flat_string(r)?;
    Ok(em)
}

fn read_section(magic: &[u8; 4], r: &mut Reader<'_>) -> Option<FlatSection> {
    if r.remaining() < 8 || !r.data().starts_with(magic) {
        return None;
    }
    let off = r.index();
    r.skip(4);
    let size = r.u32().ok()? as usize;
    if size > r.remaining() {
        return None;
    }
    r.skip(size);
    Some(FlatSection {
        present: true,
        off,
        size,
    })
}

impl FlatArchive {
    pub fn open(data: Vec<u8>) -> Result<FlatArchive> {
        Self::parse(FlatData::Owned(data))
    }

    pub fn open_file(path: impl AsRef<Path>, flags: ArchiveFlags) -> Result<FlatArchive> {
        let data = if flags.contains(ArchiveFlags::MMAP) && !cfg!(windows) {
            let file = fs::File::open(path.as_ref())?;
            FlatData::Mapped(unsafe { Mmap::map(&file)? })
        } else {
            FlatData::Owned(fs::read(path.as_ref())?)
        };
        Self::parse(data)
    }

    fn parse(data: FlatData) -> Result<FlatArchive> {
        let mut r = Reader::new(&data);

        let elna = read_section(b"ELNA", &mut r).unwrap_or_default();
        let flat = read_section(b"FLAT", &mut r)
            .ok_or_else(|| Error::InvalidSignature("missing FLAT section".into()))?;
        let tmnl = read_section(b"TMNL", &mut r).unwrap_or_default();
        let mtlc = read_section(b"MTLC", &mut r)
            .ok_or_else(|| Error::invalid("missing MTLC section"))?;
        let libl = read_section(b"LIBL", &mut r)
            .ok_or_else(|| Error::invalid("missing LIBL section"))?;
        let talt = read_section(b"TALT", &mut r).unwrap_or_default();

        if r.index() < data.len() {
            warn!("Junk at end of FLAT file? {}B/{}B", r.index(), data.len());
        }

        let hdr = match flat.size {
            32 => Self::read_hdr_v1(&data, &flat)?,
            64 => Self::read_hdr_v2(&data, &flat)?,
            size => {
                warn!("Unknown FLAT header type with size {size}B");
                FlatHeader::default()
            }
        };

        let timelines = if mtlc.present && hdr.present {
            parse_timelines(&data[mtlc.off + 8..mtlc.off + 8 + mtlc.size], hdr.version)?
        } else {
            if mtlc.present {
                warn!("Cannot read MTLC section without valid FLAT header");
            }
            Vec::new()
        };

        let libraries = Self::read_libl(&data, &libl, &elna, hdr.version)?;
        let talt_entries = Self::read_talt(&data, &talt)?;

        Ok(FlatArchive {
            data,
            elna,
            flat,
            tmnl,
            mtlc,
            libl,
            talt,
            hdr,
            timelines,
            libraries,
            talt_entries,
        })
    }

    fn read_hdr_v1(data: &[u8], flat: &FlatSection) -> Result<FlatHeader> {
        let mut r = Reader::new(&data[flat.off + 8..flat.off + 8 + flat.size]);
        Ok(FlatHeader {
            present: true,
            kind: FlatHeaderKind::V1_32,
            fps: r.i32()?,
            game_view_width: r.i32()?,
            game_view_height: r.i32()?,
            camera_length: r.f32()?,
            meter: r.f32()?,
            width: r.i32()?,
            height: r.i32()?,
            version: r.i32()?,
            uk1: 0,
        })
    }

    fn read_hdr_v2(data: &[u8], flat: &FlatSection) -> Result<FlatHeader> {
        let mut r = Reader::new(&data[flat.off + 8..flat.off + 8 + flat.size]);
        Ok(FlatHeader {
            present: true,
            kind: FlatHeaderKind::V2_64,
            version: r.i32()?,
            fps: r.i32()?,
            game_view_width: r.i32()?,
            game_view_height: r.i32()?,
            camera_length: r.f32()?,
            meter: r.f32()?,
            width: r.i32()?,
            height: r.i32()?,
            uk1: r.i32()?,
        })
    }

    fn read_libl(
        data: &[u8],
        libl: &FlatSection,
        elna: &FlatSection,
        version: i32,
    ) -> Result<Vec<Library>> {
        let payload = &data[libl.off + 8..libl.off + 8 + libl.size];
        let mut r = Reader::new(payload);
        let count = r.u32()? as usize;
        let mut libraries = Vec::with_capacity(count);
        for i in 0..count {
            match Self::parse_library(data, libl, elna, &mut r, version) {
                Ok(Some(lib)) => libraries.push(lib),
                Ok(None) => {
                    warn!("Failed to parse LIBL library {i}");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        if r.index() != libl.size {
            warn!("Junk at end of LIBL section");
        }
        Ok(libraries)
    }

    fn parse_library(
        data: &[u8],
        libl: &FlatSection,
        elna: &FlatSection,
        r: &mut Reader<'_>,
        version: i32,
    ) -> Result<Option<Library>> {
        let name = if elna.present {
            let size = r.i32()?;
            if size < 0 || r.remaining() < size as usize {
                return Err(Error::invalid(format!("invalid ELNA string size {size}")));
            }
            let bytes: Vec<u8> = r.bytes(size as usize)?.iter().map(|b| b ^ 0x55).collect();
            r.align(4);
            SjisString::from_vec(bytes)
        } else {
            read_flat_string(r)?
        };
        let kind = r.i32()?;
        let size = r.i32()?;
        if size < 0 || r.remaining() < size as usize {
            warn!(
                "LIBL entry has invalid size {size} while parsing library '{}'",
                name.to_utf8()
            );
            return Ok(None);
        }
        let size = size as usize;
        let payload_off = libl.off + 8 + r.index();

        let decoded;
        let payload = &data[payload_off..payload_off + size];
        let masked = elna.present && (kind == 4 || kind == 6);
        let payload = if masked {
            decoded = payload.iter().map(|b| b ^ 0x55).collect::<Vec<u8>>();
            &decoded[..]
        } else {
            payload
        };

        let Some(kind) = LibraryKind::from_i32(kind) else {
            warn!("Unknown LIBL entry type {kind}");
            return Ok(None);
        };

        let mut pr = Reader::new(payload);
        let content = match kind {
            LibraryKind::Cg => {
                // one extra int32 of undeciphered metadata from version 1
                let skip = if version > 0 { 4 } else { 0 };
                pr.skip(skip);
                LibraryContent::Cg {
                    off: payload_off + skip,
                    size: size - skip,
                }
            }
            LibraryKind::Memory => LibraryContent::Memory {
                off: payload_off,
                size,
            },
            LibraryKind::Timeline => LibraryContent::Timelines(parse_timelines(payload, version)?),
            LibraryKind::StopMotion => LibraryContent::StopMotion(parse_stop_motion(&mut pr)?),
            LibraryKind::Emitter => LibraryContent::Emitter(parse_emitter(&mut pr, version)?),
        };

        r.skip(size);
        r.align(4);
        Ok(Some(Library {
            name,
            kind,
            content,
        }))
    }

    fn read_talt(data: &[u8], talt: &FlatSection) -> Result<Vec<TaltEntry>> {
        if !talt.present {
            return Ok(Vec::new());
        }
        let payload = &data[talt.off + 8..talt.off + 8 + talt.size];
        let mut r = Reader::new(payload);
        let count = r.u32()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let size = r.u32()? as usize;
            let off = talt.off + 8 + r.index();
            if size > r.remaining() {
                warn!("TALT entry size exceeds section");
                break;
            }
            if !r.data().starts_with(b"AJP\0") {
                warn!("File in flat TALT section is not ajp format");
            }
            r.skip(size);
            r.align(4);

            let nr_meta = r.u32()? as usize;
            let mut metadata = Vec::with_capacity(nr_meta);
            for _ in 0..nr_meta {
                let unknown1_size = r.u32()? as usize;
                let unknown1_off = talt.off + 8 + r.index();
                r.skip(unknown1_size);
                r.align(4);
                metadata.push(TaltMetadata {
                    unknown1_off,
                    unknown1_size,
                    unknown2: r.i32()?,
                    unknown3: r.i32()?,
                    unknown4: r.i32()?,
                    unknown5: r.i32()?,
                });
            }
            entries.push(TaltEntry {
                off,
                size,
                metadata,
            });
        }
        if r.index() != talt.size {
            warn!("Junk at end of TALT section");
        }
        Ok(entries)
    }

    /// Raw bytes backing the whole file.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload bytes of a TALT entry (an AJP image).
    #[must_use]
    pub fn talt_data(&self, entry: &TaltEntry) -> &[u8] {
        &self.data[entry.off..entry.off + entry.size]
    }
}

impl Archive for FlatArchive {
    fn nr_entries(&self) -> usize {
        self.libraries.len()
    }

    fn entry(&self, no: usize) -> Option<Entry> {
        let lib = self.libraries.get(no)?;
        let size = match lib.content {
            LibraryContent::Cg { size, .. } | LibraryContent::Memory { size, .. } => size,
            _ => 0,
        };
        Some(Entry {
            no,
            name: lib.name.clone(),
            size,
        })
    }

    fn load(&self, entry: &Entry) -> Result<Cow<'_, [u8]>> {
        let lib = self
            .libraries
            .get(entry.no)
            .ok_or_else(|| Error::invalid(format!("no such FLAT entry: {}", entry.no)))?;
        match lib.content {
            LibraryContent::Cg { off, size } | LibraryContent::Memory { off, size } => {
                Ok(Cow::Borrowed(&self.data[off..off + size]))
            }
            _ => Err(Error::invalid(format!(
                "FLAT library '{}' carries no data payload",
                encoding::sjis_to_utf8(lib.name.as_bytes())
            ))),
        }
    }

    fn exists_by_name(&self, name: &[u8]) -> Option<usize> {
        self.libraries
            .iter()
            .position(|lib| lib.name.as_bytes() == name)
    }
}
