use system4::Archive;
use system4::archive::flat::{
    FlatArchive, FlatHeaderKind, KeyPos, LibraryContent, LibraryKind, TimelineContent,
    TimelineKind,
};

struct W(Vec<u8>);

impl W {
    fn i32(&mut self, v: i32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn f32(&mut self, v: f32) {
        self.0.extend_from_slice(&v.to_bits().to_le_bytes());
    }
    fn string(&mut self, s: &[u8]) {
        self.i32(s.len() as i32);
        self.0.extend_from_slice(s);
        while self.0.len() % 4 != 0 {
            self.0.push(0);
        }
    }
    fn section(&mut self, magic: &[u8; 4], payload: &[u8]) {
        self.0.extend_from_slice(magic);
        self.i32(payload.len() as i32);
        self.0.extend_from_slice(payload);
    }
}

/// 64-byte v2 FLAT header with format version 0 (uncompressed MTLC,
/// integer key positions).
fn flat_header() -> Vec<u8> {
    let mut w = W(Vec::new());
    w.i32(0); // version
    w.i32(30); // fps
    w.i32(800);
    w.i32(600);
    w.f32(100.0); // camera length
    w.f32(16.0); // meter
    w.i32(640);
    w.i32(480);
    w.i32(0); // uk1
    w.0.resize(64, 0);
    w.0
}

fn graphic_key(w: &mut W, x: i32, y: i32) {
    w.i32(x);
    w.i32(y);
    w.f32(1.0); // scale x
    w.f32(1.0);
    w.f32(0.0); // angles
    w.f32(0.0);
    w.f32(0.0);
    for _ in 0..3 {
        w.i32(0); // add rgb
    }
    for _ in 0..3 {
        w.i32(255); // mul rgb
    }
    w.i32(255); // alpha
    for v in [0, 0, 640, 480] {
        w.i32(v); // clip rect
    }
    w.i32(0); // draw filter
    w.i32(16); // origin x
    w.i32(32); // origin y
    w.i32(1); // reverse top/bottom
    w.i32(0); // reverse left/right
}

fn mtlc_payload() -> Vec<u8> {
    let mut w = W(Vec::new());
    w.i32(2); // timelines
    // graphic timeline, one key per frame below version 15
    w.string(b"sprite");
    w.string(b"lib0");
    w.i32(0); // graphic
    w.i32(0); // begin frame
    w.i32(2); // frame count
    graphic_key(&mut w, 10, 20);
    graphic_key(&mut w, 30, 40);
    // script timeline: ops are jump(5), stop, text, end
    w.string(b"script");
    w.string(b"");
    w.i32(1); // script
    w.i32(0);
    w.i32(1);
    w.i32(1); // key count
    w.i32(0); // frame index
    w.i32(1); // op: jump
    w.i32(5);
    w.i32(2); // op: stop
    w.i32(3); // op: text
    w.string(b"hello");
    w.i32(0); // end of ops
    w.0
}

fn libl_payload() -> Vec<u8> {
    let mut w = W(Vec::new());
    w.i32(2); // libraries
    // raw CG entry (version 0: no leading metadata int)
    w.string(b"cg0");
    w.i32(2); // kind: CG
    w.i32(8);
    w.0.extend_from_slice(b"QNT\0data");
    // stop-motion entry
    w.string(b"anim");
    w.i32(4); // kind: stop motion
    let mut sm = W(Vec::new());
    sm.string(b"cg0");
    sm.i32(12); // span
    sm.i32(1); // loop type
    w.i32(sm.0.len() as i32);
    w.0.extend_from_slice(&sm.0);
    w.0
}

fn build_flat() -> Vec<u8> {
    let mut w = W(Vec::new());
    w.section(b"FLAT", &flat_header());
    w.section(b"MTLC", &mtlc_payload());
    w.section(b"LIBL", &libl_payload());
    w.0
}

#[test]
fn flat_sections_and_header() {
    let fl = FlatArchive::open(build_flat()).unwrap();
    assert!(fl.flat.present);
    assert!(fl.mtlc.present);
    assert!(fl.libl.present);
    assert!(!fl.elna.present);
    assert!(!fl.talt.present);
    assert_eq!(fl.hdr.kind, FlatHeaderKind::V2_64);
    assert_eq!(fl.hdr.fps, 30);
    assert_eq!((fl.hdr.width, fl.hdr.height), (640, 480));
}

#[test]
fn flat_timelines() {
    let fl = FlatArchive::open(build_flat()).unwrap();
    assert_eq!(fl.timelines.len(), 2);

    let sprite = &fl.timelines[0];
    assert_eq!(sprite.name.to_utf8(), "sprite");
    assert_eq!(sprite.kind, TimelineKind::Graphic);
    assert_eq!(sprite.frame_count, 2);
    let TimelineContent::GraphicKeys(keys) = &sprite.content else {
        panic!("expected flat key list");
    };
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].pos, KeyPos::Int { x: 10, y: 20 });
    assert_eq!(keys[0].origin_x, 16);
    assert!(keys[0].reverse_tb);
    assert!(!keys[0].reverse_lr);
    assert_eq!(keys[1].pos, KeyPos::Int { x: 30, y: 40 });

    let script = &fl.timelines[1];
    assert_eq!(script.kind, TimelineKind::Script);
    let TimelineContent::Script(keys) = &script.content else {
        panic!("expected script keys");
    };
    assert_eq!(keys.len(), 1);
    assert!(keys[0].has_jump);
    assert_eq!(keys[0].jump_frame, 5);
    assert!(keys[0].is_stop);
    assert_eq!(keys[0].text.as_ref().unwrap().to_utf8(), "hello");
}

#[test]
fn flat_libraries_behind_the_archive_trait() {
    let fl = FlatArchive::open(build_flat()).unwrap();
    assert_eq!(fl.libraries.len(), 2);
    assert_eq!(fl.libraries[0].kind, LibraryKind::Cg);
    let LibraryContent::StopMotion(sm) = &fl.libraries[1].content else {
        panic!("expected stop motion");
    };
    assert_eq!(sm.library_name.to_utf8(), "cg0");
    assert_eq!(sm.span, 12);

    // LIBL entries are archive entries; CG payloads load
    let ar: &dyn Archive = &fl;
    assert_eq!(ar.nr_entries(), 2);
    let entry = ar.entry_by_name(b"cg0").unwrap();
    let data = ar.load(&entry).unwrap();
    assert_eq!(data.as_ref(), b"QNT\0data");
    // descriptor-only entries carry no payload
    let anim = ar.entry_by_name(b"anim").unwrap();
    assert!(ar.load(&anim).is_err());
}

#[test]
fn flat_missing_mandatory_section_is_rejected() {
    let mut w = W(Vec::new());
    w.section(b"FLAT", &flat_header());
    // no MTLC
    w.section(b"LIBL", &[0, 0, 0, 0]);
    assert!(FlatArchive::open(w.0).is_err());

    let mut w = W(Vec::new());
    w.section(b"MTLC", &[0, 0, 0, 0]);
    assert!(FlatArchive::open(w.0).is_err());
}
