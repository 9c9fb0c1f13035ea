use clap::{Arg, ArgAction, Command, value_parser};
use clap_num::maybe_hex;
use exhume_body::{Body, BodySlice};
use exhume_mft::attribute::AttributeValue;
use exhume_mft::{FileRecord, LogDiagnostics, Mft, ParseOptions, RECORD_SIZE};
use log::{debug, error};
use prettytable::{Table, row};
use serde_json::json;
use std::io::Read;

fn main() {
    let matches = Command::new("exhume_mft")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Rebuild the directory tree of an NTFS Master File Table.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(value_parser!(String))
                .required(true)
                .help("The path to the body holding the MFT (an extracted $MFT or a disk image)."),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(value_parser!(String))
                .required(false)
                .help("The format of the file, either 'raw' or 'ewf'."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("Byte offset of the first MFT record inside the body (decimal or hex)."),
        )
        .arg(
            Arg::new("records")
                .short('r')
                .long("records")
                .value_parser(maybe_hex::<u64>)
                .required(true)
                .help("Number of 1024-byte MFT records to read (decimal or hex)."),
        )
        .arg(
            Arg::new("entry")
                .short('e')
                .long("entry")
                .value_parser(maybe_hex::<u64>)
                .help("Display the metadata of the in-use record with this entry number."),
        )
        .arg(
            Arg::new("summary")
                .long("summary")
                .action(ArgAction::SetTrue)
                .help("Display how many records are in use, free, bad and uninitialized."),
        )
        .arg(
            Arg::new("tree")
                .short('t')
                .long("tree")
                .action(ArgAction::SetTrue)
                .help("Rebuild the directory tree and print every path."),
        )
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .value_parser(value_parser!(String))
                .requires("tree")
                .help("With --tree, only print items with this name (case-insensitive)."),
        )
        .arg(
            Arg::new("sequential")
                .long("sequential")
                .action(ArgAction::SetTrue)
                .help("Decode records on a single thread."),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output the summary, record or tree in JSON format."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    // Initialize logger.
    let log_level_str = matches.get_one::<String>("log_level").unwrap();
    let level_filter = match log_level_str.as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level_filter).init();

    let file_path = matches.get_one::<String>("body").unwrap();
    let auto = String::from("auto");
    let format = matches.get_one::<String>("format").unwrap_or(&auto);
    let offset = *matches.get_one::<u64>("offset").unwrap();
    let records = *matches.get_one::<u64>("records").unwrap();
    let entry = matches.get_one::<u64>("entry").copied();
    let show_summary = matches.get_flag("summary");
    let show_tree = matches.get_flag("tree");
    let name_filter = matches.get_one::<String>("name");
    let json_output = matches.get_flag("json");
    let options = ParseOptions {
        parallel: !matches.get_flag("sequential"),
    };

    // 1) Read the raw MFT out of the body.
    let mut body = Body::new(file_path.to_owned(), format);
    debug!("Created Body from '{}'", file_path);

    let mft_size = records * RECORD_SIZE as u64;
    let mut slice = match BodySlice::new(&mut body, offset, mft_size) {
        Ok(sl) => sl,
        Err(e) => {
            error!("Could not create BodySlice: {}", e);
            return;
        }
    };
    let mut raw = vec![0u8; mft_size as usize];
    if let Err(e) = slice.read_exact(&mut raw) {
        error!("Could not read {} bytes of MFT: {}", mft_size, e);
        return;
    }

    // 2) Parse and bucket every record.
    let mut mft = match Mft::with_options(&raw, options, &LogDiagnostics) {
        Ok(mft) => mft,
        Err(e) => {
            error!("Couldn't parse the MFT: {}", e);
            return;
        }
    };

    if show_summary {
        if json_output {
            let summary = json!({
                "in_use": mft.file_records.len(),
                "free": mft.free_file_records.len(),
                "bad": mft.bad_records.len(),
                "uninitialized": mft.uninitialized_records.len(),
                "root": mft.root_key().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&summary).unwrap());
        } else {
            println!("{}", summary_table(&mft));
        }
    }

    if let Some(entry) = entry {
        match mft.find_entry(entry) {
            Some(record) => {
                if json_output {
                    match serde_json::to_string_pretty(record) {
                        Ok(s) => println!("{}", s),
                        Err(e) => error!("Error serializing record to JSON: {}", e),
                    }
                } else {
                    println!("{}", record_table(record));
                }
            }
            None => error!("No in-use record with entry number {}", entry),
        }
    }

    if show_tree {
        let report = mft.build_file_system_with(&LogDiagnostics);
        debug!("{:?}", report);
        let root = &mft.root_directory;

        if let Some(name) = name_filter {
            let hits = root.find_by_name(name);
            if json_output {
                println!("{}", serde_json::to_string_pretty(&hits).unwrap());
            } else {
                for item in hits {
                    println!("{}  {}", item.key, item.full_path());
                }
            }
        } else if json_output {
            match serde_json::to_string_pretty(root) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing tree to JSON: {}", e),
            }
        } else {
            for (_, item) in root.walk() {
                println!("{}  {}", item.key, item.full_path());
            }
        }
    }
}

fn summary_table(mft: &Mft) -> String {
    let mut t = Table::new();
    t.add_row(row!["Master File Table"]);
    t.add_row(row![b -> "In use", mft.file_records.len()]);
    t.add_row(row![b -> "Free", mft.free_file_records.len()]);
    t.add_row(row![b -> "Bad", mft.bad_records.len()]);
    t.add_row(row![b -> "Uninitialized", mft.uninitialized_records.len()]);
    t.add_row(row![b -> "Root", mft.root_key()]);
    t.to_string()
}

/// Human-readable view of one record.
fn record_table(record: &FileRecord) -> String {
    let mut out = String::new();

    let mut hdr = Table::new();
    hdr.add_row(row!["MFT Entry Header Values"]);
    hdr.add_row(row![b -> "Key", record.key()]);
    hdr.add_row(row![b -> "Offset", format!("0x{:X}", record.offset)]);
    hdr.add_row(row![b -> "$LogFile Sequence Number", record.header.lsn]);
    hdr.add_row(row![b -> "Flags", record_flags_to_string(record.entry_flags)]);
    hdr.add_row(row![b -> "Links", record.header.hard_link_count]);
    hdr.add_row(row![b -> "Base Record", record.base_record_reference]);
    out.push_str(&hdr.to_string());

    let mut attrs = Table::new();
    attrs.add_row(row!["Attributes", "Name", "Status", "Size"]);
    for a in &record.attributes {
        attrs.add_row(row![
            format!("{:?} (0x{:X}‑#{})", a.attr_type(), a.attr_type().code(), a.header.id),
            a.header.name.clone().unwrap_or_else(|| "N/A".to_string()),
            if a.is_resident() { "Resident" } else { "Non‑resident" },
            a.content_size()
        ]);
    }
    out.push('\n');
    out.push_str(&attrs.to_string());

    if let Some(si) = record.standard_information() {
        let mut t = Table::new();
        t.add_row(row!["$STANDARD_INFORMATION"]);
        t.add_row(row![b -> "Created", timestamp(&si.created)]);
        t.add_row(row![b -> "File Modified", timestamp(&si.modified)]);
        t.add_row(row![b -> "MFT Modified", timestamp(&si.mft_modified)]);
        t.add_row(row![b -> "Accessed", timestamp(&si.accessed)]);
        t.add_row(row![b -> "Attributes", format!("0x{:08X}", si.file_attrs)]);
        out.push('\n');
        out.push_str(&t.to_string());
    }

    let mut names = Table::new();
    names.add_row(row!["$FILE_NAME Attributes"]);
    for a in &record.attributes {
        if let AttributeValue::FileName(fname) = &a.value {
            names.add_row(row![b -> "Name", fname.name.clone()]);
            names.add_row(row![b -> "Namespace", format!("{:?}", fname.namespace)]);
            names.add_row(row![b -> "Parent", fname.parent_reference]);
            names.add_row(row![b -> "Directory", fname.is_directory()]);
            names.add_row(row![b -> "Actual", fname.real_size]);
            names.add_row(row!["‑ Created", timestamp(&fname.created)]);
            names.add_row(row!["‑ Modified", timestamp(&fname.modified)]);
            names.add_row(row!["", ""]);
        }
    }
    out.push('\n');
    out.push_str(&names.to_string());

    let ads = record.data_streams();
    if !ads.is_empty() {
        let mut t = Table::new();
        t.add_row(row!["Alternate Data Streams"]);
        t.add_row(row![b -> "Name", "Size", "Resident"]);
        for s in ads {
            t.add_row(row![s.name, s.size, if s.resident { "Yes" } else { "No" }]);
        }
        out.push('\n');
        out.push_str(&t.to_string());
    }

    out
}

fn timestamp(ts: &Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|dt| dt.to_rfc3339()).unwrap_or_else(|| "‑".into())
}

/// Decode MFT record flags.
fn record_flags_to_string(flags: u16) -> String {
    let mut v = Vec::new();
    if flags & 0x0001 != 0 {
        v.push("Allocated")
    }
    if flags & 0x0002 != 0 {
        v.push("Directory")
    }
    if flags & 0x0004 != 0 {
        v.push("System")
    }
    if flags & 0x0008 != 0 {
        v.push("Index View")
    }
    if v.is_empty() {
        "None".into()
    } else {
        v.join(" | ")
    }
}
