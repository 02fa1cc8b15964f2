//! Tests for mock programs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vantage_core::prelude::*;

fn sample_memory() -> Vec<u8>
{
    let mut bytes = vec![0u8; 0x1000];
    bytes[..8].copy_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
    bytes
}

fn sample_program() -> Program
{
    Program::from_mock(
        8,
        true,
        vec![MockSegment::from_bytes(0x1000, sample_memory())],
        vec![
            MockType::new("int", TypeKind::Base, Some(4)),
            MockType::new("task_struct", TypeKind::Struct, Some(9792)),
        ],
        vec![MockSymbol::new("init_task", 0x1000, 0x40), MockSymbol::new("jiffies", 0x1800, 8)],
    )
    .unwrap()
}

#[test]
fn test_mock_round_trip()
{
    let program = sample_program();

    assert_eq!(program.read_u64(0x1000).unwrap(), 0x1122_3344_5566_7788);
    assert_eq!(program.read_word(0x1000).unwrap(), 0x1122_3344_5566_7788);
    assert_eq!(program.read_u32(0x1000).unwrap(), 0x5566_7788);
    assert_eq!(program.read_u16(0x1000).unwrap(), 0x7788);
    assert_eq!(program.read_u8(0x1007).unwrap(), 0x11);
}

#[test]
fn test_reads_outside_segment_fault()
{
    let program = sample_program();

    assert!(matches!(program.read_u64(0x2000), Err(VantageError::Fault { address: 0x2000, .. })));
    assert!(matches!(program.read_u64(0xffc), Err(VantageError::Fault { .. })));
    assert!(matches!(program.read_u64(0x1ffc), Err(VantageError::Fault { .. })));
    assert!(program.read_u32(0x1ffc).is_ok());
}

#[test]
fn test_word_mask()
{
    assert_eq!(sample_program().word_mask(), u64::MAX);

    let program = Program::from_mock(4, true, vec![], vec![], vec![]).unwrap();
    assert_eq!(program.word_mask(), 0xFFFF_FFFF);
    assert_eq!(program.word_size(), WordSize::Four);
}

#[test]
fn test_four_byte_program_rejects_high_segments()
{
    let err = Program::from_mock(4, true, vec![MockSegment::from_bytes(0x1_0000_0000, [0xaa; 16])], vec![], vec![])
        .unwrap_err();
    assert!(matches!(err, VantageError::MalformedInput(_)));

    let program =
        Program::from_mock(4, true, vec![MockSegment::from_bytes(0xffff_fff0, [0xaa; 16])], vec![], vec![]).unwrap();
    assert_eq!(program.read_u32(0xffff_fffc).unwrap(), 0xaaaa_aaaa);
    assert!(matches!(program.read_u64(0xffff_fffc), Err(VantageError::Fault { .. })));
    assert!(matches!(program.read_u8(0x1_0000_0000), Err(VantageError::Fault { .. })));
}

#[test]
fn test_unsupported_word_size()
{
    let err = Program::from_mock(2, true, vec![], vec![], vec![]).unwrap_err();
    assert!(matches!(err, VantageError::UnsupportedTarget(_)));
}

#[test]
fn test_big_endian_words()
{
    let segment = MockSegment::from_bytes(0x8000, vec![0x12, 0x34, 0x56, 0x78]);
    let program = Program::from_mock(4, false, vec![segment], vec![], vec![]).unwrap();

    assert!(!program.is_little_endian());
    assert_eq!(program.read_word(0x8000).unwrap(), 0x1234_5678);
    assert_eq!(program.read_u16(0x8002).unwrap(), 0x5678);
}

#[test]
fn test_physical_reads()
{
    let segment = MockSegment::from_bytes(0xffff_8000_0000_0000, vec![0xaa; 16]).at_physical(0x10_0000);
    let program = Program::from_mock(8, true, vec![segment], vec![], vec![]).unwrap();

    let mut buf = [0u8; 4];
    program.read_memory(0x10_0004, &mut buf, true).unwrap();
    assert_eq!(buf, [0xaa; 4]);
    assert!(program.read_memory(0x10_0004, &mut buf, false).is_err());
}

#[test]
fn test_callback_segment()
{
    let segment = MockSegment::from_callback(0x4000, 0x100, |offset, buf| {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = (offset as usize + i) as u8;
        }
        Ok(())
    });
    let program = Program::from_mock(8, true, vec![segment], vec![], vec![]).unwrap();

    assert_eq!(program.read_bytes(0x4010, 3).unwrap(), vec![0x10, 0x11, 0x12]);
}

#[test]
fn test_overlapping_segments_rejected()
{
    let segments = vec![
        MockSegment::from_bytes(0x1000, vec![0; 0x100]),
        MockSegment::from_bytes(0x1080, vec![0; 0x100]),
    ];
    let err = Program::from_mock(8, true, segments, vec![], vec![]).unwrap_err();
    assert!(matches!(err, VantageError::MalformedInput(_)));
}

#[test]
fn test_type_and_symbol_lookups()
{
    let program = sample_program();

    let int = program.find_type("int").unwrap();
    assert_eq!((int.kind, int.size), (TypeKind::Base, Some(4)));
    assert_eq!(program.find_type("struct task_struct").unwrap().size, Some(9792));
    assert_eq!(program.find_type("int *").unwrap().size, Some(8));
    assert!(matches!(program.find_type("long"), Err(VantageError::Lookup(_))));

    assert_eq!(program.find_symbol("jiffies").unwrap().address, 0x1800);
    assert_eq!(program.symbolize(0x1010).unwrap().name, "init_task");
    assert!(matches!(program.find_symbol("missing"), Err(VantageError::Lookup(_))));
}

#[test]
fn test_mock_is_userspace()
{
    let program = sample_program();

    assert!(!program.is_linux_kernel());
    assert!(!program.is_live());
    assert!(program.flags().is_empty());
    assert!(program.mappings().unwrap().is_empty());
    assert!(matches!(
        program.kernel_info(),
        Err(VantageError::VariantMisuse {
            requested: _,
            kind: TargetKind::Userspace
        })
    ));
}

#[test]
fn test_deinitialize_runs_cleanups_once()
{
    let runs = Arc::new(Mutex::new(Vec::new()));
    let mut program = sample_program();
    for name in ["first", "second"] {
        let runs = Arc::clone(&runs);
        program
            .add_cleanup(CleanupKey::new(name, 0), move || {
                runs.lock().unwrap().push(name);
                Ok(())
            })
            .unwrap();
    }

    program.deinitialize().unwrap();
    assert_eq!(*runs.lock().unwrap(), vec!["second", "first"]);

    assert!(matches!(program.deinitialize(), Err(VantageError::Deinitialized)));
    assert!(matches!(program.read_u64(0x1000), Err(VantageError::Deinitialized)));
    assert!(matches!(program.metadata(), Err(VantageError::Deinitialized)));
    assert!(program.is_deinitialized());
    drop(program);
    assert_eq!(runs.lock().unwrap().len(), 2);
}

#[test]
fn test_removed_cleanup_does_not_run()
{
    let runs = Arc::new(AtomicUsize::new(0));
    let mut program = sample_program();
    let key = CleanupKey::new("temporary", 42);
    let counter = Arc::clone(&runs);
    program
        .add_cleanup(key.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(program.remove_cleanup(&key));
    assert!(!program.remove_cleanup(&key));
    drop(program);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_drop_runs_cleanups()
{
    let runs = Arc::new(AtomicUsize::new(0));
    {
        let mut program = sample_program();
        let counter = Arc::clone(&runs);
        program
            .add_cleanup(CleanupKey::new("on-drop", 0), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

struct Probe(Arc<AtomicUsize>);

impl Drop for Probe
{
    fn drop(&mut self)
    {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_failed_mock_releases_reader_once()
{
    let drops = Arc::new(AtomicUsize::new(0));
    let probe = Probe(Arc::clone(&drops));
    let segment = MockSegment::from_callback(0x1000, 0x10, move |_, buf| {
        let _probe = &probe;
        buf.fill(0);
        Ok(())
    });
    let symbols = vec![MockSymbol::new("dup", 0x1000, 4), MockSymbol::new("dup", 0x1004, 4)];

    let err = Program::from_mock(8, true, vec![segment], vec![], symbols).unwrap_err();

    assert!(matches!(err, VantageError::MalformedInput(_)));
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_duplicate_mock_types_rejected()
{
    let types = vec![MockType::new("int", TypeKind::Base, Some(4)), MockType::new("int", TypeKind::Base, Some(4))];
    let err = Program::from_mock(8, true, vec![], types, vec![]).unwrap_err();
    assert!(matches!(err, VantageError::MalformedInput(_)));
}

#[test]
fn test_program_is_send()
{
    fn assert_send<T: Send>() {}
    assert_send::<Program>();
}
