use clap::{App, Arg, ArgMatches, SubCommand};
use bgring::{
    config::{DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_LENGTH},
    Backend, BufferRegion, Completion, Coordinator, Result, RingConfig, RingContext, RingError,
    Selector, SharedRing,
};
use std::{
    fs::File,
    os::fd::{AsRawFd, RawFd},
    time::Duration,
};

fn main() -> Result<()> {
    env_logger::init();

    let length_default = DEFAULT_BUFFER_LENGTH.to_string();
    let count_default = DEFAULT_BUFFER_COUNT.to_string();

    let backend_arg = Arg::with_name("backend")
        .short("b")
        .long("backend")
        .value_name("BACKEND")
        .help("Kernel facility: soft, kernel or auto")
        .possible_values(&["soft", "kernel", "auto"])
        .default_value("soft")
        .takes_value(true);

    let matches = App::new("bgring")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Asynchronous reads through an I/O ring with kernel-selected buffer groups")
        .subcommand(
            SubCommand::with_name("read")
                .about("Read consecutive chunks of a file through the ring")
                .arg(
                    Arg::with_name("file")
                        .short("f")
                        .long("file")
                        .value_name("FILE")
                        .help("File to read")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("size")
                        .short("s")
                        .long("size")
                        .value_name("SIZE")
                        .help("Bytes per read (decimal or 0x-prefixed hex)")
                        .default_value(&length_default)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("count")
                        .short("c")
                        .long("count")
                        .value_name("COUNT")
                        .help("Number of reads")
                        .default_value(&count_default)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("mode")
                        .short("m")
                        .long("mode")
                        .value_name("MODE")
                        .help("fixed: one caller buffer per read; group: kernel-selected buffers")
                        .possible_values(&["fixed", "group"])
                        .default_value("group")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("depth")
                        .short("d")
                        .long("depth")
                        .value_name("DEPTH")
                        .help("Queue depth")
                        .default_value("256")
                        .takes_value(true),
                )
                .arg(backend_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("provision")
                .about("Provision buffer groups from several coordinated threads")
                .arg(
                    Arg::with_name("threads")
                        .short("t")
                        .long("threads")
                        .value_name("THREADS")
                        .help("Number of provisioning threads")
                        .default_value("2")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("count")
                        .short("c")
                        .long("count")
                        .value_name("COUNT")
                        .help("Buffers per thread")
                        .default_value("8")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("size")
                        .short("s")
                        .long("size")
                        .value_name("SIZE")
                        .help("Bytes per buffer (decimal or 0x-prefixed hex)")
                        .default_value(&length_default)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("pin")
                        .long("pin")
                        .help("Pin each thread to its own CPU"),
                )
                .arg(backend_arg),
        )
        .subcommand(SubCommand::with_name("info").about("Show version and build information"))
        .get_matches();

    match matches.subcommand() {
        ("read", Some(read_matches)) => handle_read(read_matches),
        ("provision", Some(provision_matches)) => handle_provision(provision_matches),
        ("info", Some(_)) => show_info(),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_number(matches: &ArgMatches, name: &str) -> Result<u64> {
    let raw = matches
        .value_of(name)
        .ok_or_else(|| RingError::invalid_argument(name, "Missing value"))?;

    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|_| RingError::invalid_argument(name, format!("Invalid number '{}'", raw)))
}

fn parse_backend(matches: &ArgMatches) -> Result<Backend> {
    let name = matches.value_of("backend").unwrap_or("soft");
    Backend::from_name(name)
        .ok_or_else(|| RingError::invalid_argument("backend", format!("Unknown backend '{}'", name)))
}

fn handle_read(matches: &ArgMatches) -> Result<()> {
    let path = matches
        .value_of("file")
        .ok_or_else(|| RingError::invalid_argument("file", "Missing file"))?;
    let size = parse_number(matches, "size")? as usize;
    let count = parse_number(matches, "count")? as usize;
    let depth = parse_number(matches, "depth")? as u32;
    let group_mode = matches.value_of("mode") == Some("group");

    let file = File::open(path).map_err(|e| RingError::from_io(e, "Failed to open file"))?;
    let fd = file.as_raw_fd();

    let config = RingConfig::new(depth)
        .with_name("bgring-read")
        .with_backend(parse_backend(matches)?);
    let mut ring = RingContext::with_config(config)?;

    println!(
        "Reading {} x {:#x} bytes from {} ({} mode, {} backend)",
        count,
        size,
        path,
        if group_mode { "group" } else { "fixed" },
        ring.backend().map(|b| b.name()).unwrap_or("closed")
    );

    if group_mode {
        ring.provide_and_wait(BufferRegion::for_buffers(size, count)?, size, count, 0, 0)?;
    }

    read_in_windows(&mut ring, fd, size, count, group_mode, |ring, completion| {
        match completion {
            Ok(completion) => print_completion(ring, &completion),
            Err(e @ RingError::Io { .. }) => {
                println!("  failed: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    })?;

    if group_mode {
        let group = ring.group(0)?;
        println!("\n{}", group.stats().summary());
    }
    println!("{}", ring.stats().summary());

    ring.close()
}

/// Submit `count` consecutive reads, at most one queue depth at a time,
/// handing each completion to `on_completion`
fn read_in_windows<F>(
    ring: &mut RingContext,
    fd: RawFd,
    size: usize,
    count: usize,
    group_mode: bool,
    mut on_completion: F,
) -> Result<()>
where
    F: FnMut(&RingContext, Result<Completion>) -> Result<()>,
{
    let window = ring.queue_depth() as usize;
    let mut next = 0;

    while next < count {
        let end = count.min(next + window);
        for index in next..end {
            let selector = if group_mode {
                Selector::GroupId(0)
            } else {
                Selector::FixedBuffer(vec![0; size])
            };
            ring.submit_read(fd, size as i64, (index * size) as i64, selector)?;
        }
        for _ in next..end {
            let completion = ring.wait_one();
            on_completion(ring, completion)?;
        }
        next = end;
    }

    Ok(())
}

fn print_completion(ring: &RingContext, completion: &Completion) -> Result<()> {
    match completion.buffer_id() {
        Some(bid) => {
            let data = ring.buffer(0, bid)?;
            println!(
                "  {} buffer {}: {} bytes: {}",
                completion.token,
                bid,
                data.len(),
                String::from_utf8_lossy(data).escape_debug()
            );
        }
        None => {
            let bytes = match &completion.kind {
                bgring::CompletionKind::Fixed { buffer } => buffer.as_slice(),
                _ => &[][..],
            };
            println!(
                "  {} fixed: {} bytes: {}",
                completion.token,
                bytes.len(),
                String::from_utf8_lossy(bytes).escape_debug()
            );
        }
    }
    Ok(())
}

fn handle_provision(matches: &ArgMatches) -> Result<()> {
    let threads = parse_number(matches, "threads")? as usize;
    let count = parse_number(matches, "count")? as usize;
    let size = parse_number(matches, "size")? as usize;
    let pin = matches.is_present("pin");

    if threads == 0 || threads > u16::MAX as usize {
        return Err(RingError::invalid_argument("threads", "Need between 1 and 65535 threads"));
    }

    let coordinator = Coordinator::builder("provision")
        .flag("go")
        .counter("provided")
        .build()?;
    let config = RingConfig::new((threads as u32).max(2))
        .with_name("bgring-provision")
        .with_backend(parse_backend(matches)?);
    let shared = SharedRing::new(RingContext::with_config(config)?, coordinator.clone())?;
    let waiter = shared.claim_waiter()?;

    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let mut handles = Vec::with_capacity(threads);
    for index in 0..threads {
        let ring = shared.clone();
        let core = if pin { Some(index % cores) } else { None };
        handles.push(coordinator.spawn_participant(
            format!("provider-{}", index),
            core,
            move |coordinator| -> Result<()> {
                coordinator.wait_for_flag("go", Some(Duration::from_secs(10)))?;
                let region = BufferRegion::for_buffers(size, count)?;
                ring.provide(region, size, count, index as u16, 0)?;
                coordinator.add("provided", count as i64)?;
                Ok(())
            },
        )?);
    }

    coordinator.publish("go")?;
    for _ in 0..threads {
        let completion = waiter.wait_one_timeout(Duration::from_secs(10))?;
        println!(
            "  {} group {:?} accepted",
            completion.token,
            completion.group_id()
        );
    }

    for handle in handles {
        handle
            .join()
            .map_err(|_| RingError::coordination("Provider thread panicked"))??;
    }

    let total = coordinator.counter("provided")?;
    println!("\nProvided {} buffers across {} groups", total, threads);
    shared.with_ring(|ring| {
        for group_id in ring.groups().group_ids() {
            if let Some(group) = ring.groups().get(group_id) {
                println!("  group {}: {}", group_id, group.stats().summary());
            }
        }
    });
    println!("{}", shared.stats().summary());

    drop(waiter);
    coordinator.teardown();
    shared.close()
}

fn show_info() -> Result<()> {
    println!("bgring {}", bgring::VERSION);
    println!("  default queue depth: {}", bgring::config::DEFAULT_QUEUE_DEPTH);
    println!("  max queue depth: {}", bgring::config::MAX_QUEUE_DEPTH);
    #[cfg(target_os = "linux")]
    println!(
        "  io_uring available: {}",
        bgring::ring::UringDriver::is_available()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reads_beyond_queue_depth_run_in_windows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..40u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let mut ring = RingContext::create(4).unwrap();
        let mut seen = Vec::new();
        read_in_windows(&mut ring, file.as_file().as_raw_fd(), 4, 10, false, |ring, completion| {
            assert!(ring.in_flight() < 4);
            seen.push(completion?.into_buffer().unwrap_or_default());
            Ok(())
        })
        .unwrap();

        seen.sort();
        let expected: Vec<Vec<u8>> = data.chunks(4).map(|c| c.to_vec()).collect();
        assert_eq!(seen, expected);
        assert_eq!(ring.stats().queue_full_rejections, 0);
    }

    #[test]
    fn test_group_reads_beyond_queue_depth() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[3u8; 48]).unwrap();
        file.flush().unwrap();

        let mut ring = RingContext::create(2).unwrap();
        ring.provide_and_wait(BufferRegion::for_buffers(8, 6).unwrap(), 8, 6, 0, 0)
            .unwrap();

        let mut completed = 0;
        read_in_windows(&mut ring, file.as_file().as_raw_fd(), 8, 6, true, |ring, completion| {
            let bid = completion?.buffer_id().unwrap();
            assert_eq!(ring.buffer(0, bid)?, &[3u8; 8][..]);
            completed += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(completed, 6);
        assert_eq!(ring.group(0).unwrap().available(), 0);
    }
}
