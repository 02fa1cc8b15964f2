//! Parsers for the on-disk and procfs formats the backends read.
//!
//! | Module | Input |
//! |---|---|
//! | [`core`] | ELF core files (`vmcore`, process cores, `/proc/kcore`) |
//! | [`vmcoreinfo`] | the `VMCOREINFO` note / `/sys/kernel/vmcoreinfo` payload |
//! | [`nt_file`] | the `NT_FILE` note of a process core |
//! | [`proc_maps`] | `/proc/<pid>/maps` |
//! | [`kallsyms`] | `/proc/kallsyms` and `System.map` |

pub mod core;
pub mod kallsyms;
pub mod nt_file;
pub mod proc_maps;
pub mod vmcoreinfo;
