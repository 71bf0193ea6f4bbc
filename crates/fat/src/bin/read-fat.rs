use std::fs::File;
use std::os::unix::prelude::FileExt;

use zerocopy::FromBytes;

fn main() {
    // Get command line arguments, including a FAT disk file
    let args: Vec<String> = std::env::args().collect();
    let disk_file = match &args[..] {
        [_, disk_file] => disk_file,
        _ => {
            eprintln!("Usage: {} <disk_file>", args[0]);
            std::process::exit(1);
        }
    };

    println!("Reading FAT disk file: {disk_file}");
    let file = File::open(disk_file).expect("failed to open disk file");

    let boot_sector = read_bytes(&file, 0, fat::BOOT_SECTOR_SIZE);
    let bpb = fat::BIOSParameterBlock::read_from_prefix(&boot_sector)
        .expect("failed to read BIOS parameter block");
    println!("BIOS parameter block: {bpb:#X?}");

    let geometry = match fat::Geometry::parse(&boot_sector) {
        Ok(geometry) => geometry,
        Err(err) => {
            eprintln!("Invalid boot sector: {err}");
            std::process::exit(1);
        }
    };
    println!("{geometry:#?}");

    let sector_size = geometry.bytes_per_sector as usize;
    let fat_bytes = read_bytes(
        &file,
        u64::from(geometry.fat_start_lba) * sector_size as u64,
        geometry.fat_size_bytes(),
    );
    let table = fat::FatTable::new(geometry.fat_type, fat_bytes, geometry.cluster_count);
    println!(
        "{}: {} clusters of {} bytes, {} free",
        geometry.fat_type,
        geometry.cluster_count,
        geometry.cluster_size(),
        table.free_count()
    );

    for copy in 1..geometry.fat_count {
        let start = geometry.fat_start_lba + copy * geometry.fat_size_sectors;
        let mirror = read_bytes(
            &file,
            u64::from(start) * sector_size as u64,
            geometry.fat_size_bytes(),
        );
        let changed = table.changed_sectors(&mirror, sector_size);
        if changed.is_empty() {
            println!("FAT #{copy} matches FAT #0");
        } else {
            println!("FAT #{copy} differs from FAT #0 in sectors {changed:?}");
        }
    }

    let root = if geometry.has_fixed_root() {
        read_bytes(
            &file,
            u64::from(geometry.root_dir_start_lba) * sector_size as u64,
            geometry.root_dir_sectors as usize * sector_size,
        )
    } else {
        let mut bytes = Vec::new();
        for cluster in table.chain(geometry.root_cluster) {
            let lba = geometry
                .cluster_to_lba(cluster)
                .expect("root chain left the data region");
            bytes.extend(read_bytes(
                &file,
                u64::from(lba) * sector_size as u64,
                geometry.cluster_size() as usize,
            ));
        }
        bytes
    };

    println!("Root directory:");
    let fat32 = geometry.fat_type == fat::FatType::Fat32;
    let mut long_name = fat::LongNameBuilder::new();
    for (_, slot) in fat::DirectorySector(&root).iter() {
        match slot {
            fat::DirSlot::End => break,
            fat::DirSlot::Deleted => long_name.reset(),
            fat::DirSlot::LongName(entry) => long_name.push(&entry),
            fat::DirSlot::VolumeLabel(entry) => {
                long_name.reset();
                println!("  volume label {}", String::from_utf8_lossy(&entry.name));
            }
            fat::DirSlot::Short(entry) => {
                let short = entry.short_name();
                let name = long_name
                    .finish(short.checksum())
                    .unwrap_or_else(|| short.to_string());
                let kind = if entry.is_directory() { "<DIR>" } else { "" };
                let size = entry.file_size;
                println!(
                    "  {:<5} {:>10} {} cluster {:>6} {} ({})",
                    kind,
                    size,
                    entry.modified(),
                    entry.first_cluster(fat32),
                    name,
                    short
                );
            }
        }
    }
}

fn read_bytes(file: &File, offset: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    file.read_exact_at(&mut buf, offset)
        .expect("failed to read bytes");
    buf
}
