//! Subcommand handlers: the CLI stands in for the GUI caller, driving the
//! recording controller, the capability probes, and the profile store.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::bail;
use tracing::info;

use perfdeck_config::ProfileStore;
use perfdeck_config::RecordProfile;
use perfdeck_config::split_path_list;
use perfdeck_record::RecordController;
use perfdeck_record::RecordEvent;
use perfdeck_record::RecordingRequest;
use perfdeck_record::probes;

use crate::commands::ProfileArgs;
use crate::commands::ProfileCommand;
use crate::commands::RecordArgs;

pub fn run_record(args: RecordArgs) -> anyhow::Result<()> {
    let request = build_request(&args)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the event loop")?;
    runtime.block_on(async move {
        let (controller, mut events) = RecordController::new();
        let controller = controller.with_perf_binary(&args.perf);
        controller.start(request);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, stopping the recording");
                    controller.stop();
                }
                event = events.recv() => match event {
                    Some(RecordEvent::Started { binary, args }) => {
                        info!("recording started: {binary} {}", args.join(" "));
                    }
                    Some(RecordEvent::Output(text)) => {
                        print!("{text}");
                        let _ = std::io::stdout().flush();
                    }
                    Some(RecordEvent::Finished(path)) => {
                        info!("recording written to {}", path.display());
                        return Ok(());
                    }
                    Some(RecordEvent::Failed(message)) => bail!(message),
                    None => bail!("recording controller went away"),
                }
            }
        }
    })
}

fn build_request(args: &RecordArgs) -> anyhow::Result<RecordingRequest> {
    let mut perf_options = args.perf_options.clone();
    if args.off_cpu {
        if !probes::can_profile_off_cpu() {
            bail!(
                "off-CPU profiling is not available: the kernel tracing directory \
                 must be readable and perf_event_paranoid set to -1"
            );
        }
        perf_options.extend(probes::off_cpu_profiling_options());
    }
    if args.all_cpus {
        Ok(RecordingRequest::system_wide(perf_options, &args.output))
    } else if !args.pids.is_empty() {
        Ok(RecordingRequest::processes(
            args.pids.clone(),
            perf_options,
            &args.output,
            args.elevate,
        ))
    } else if !args.command.is_empty() {
        Ok(RecordingRequest::launch(
            PathBuf::from(&args.command[0]),
            args.command[1..].to_vec(),
            args.cwd.clone(),
            perf_options,
            &args.output,
            args.elevate,
        ))
    } else {
        bail!("nothing to record: pass --pid, --all-cpus, or a command to launch");
    }
}

pub fn run_probes() -> anyhow::Result<()> {
    let report = [
        ("perf installed", probes::is_perf_installed()),
        ("off-cpu profiling", probes::can_profile_off_cpu()),
        ("cpu sampling", probes::can_sample_cpu()),
        ("switch events", probes::can_switch_events()),
        ("async I/O", probes::can_use_aio()),
        ("zstd compression", probes::can_compress()),
    ];
    for (name, available) in report {
        println!("{name}: {}", if available { "yes" } else { "no" });
    }
    Ok(())
}

pub fn run_profile(args: ProfileArgs) -> anyhow::Result<()> {
    let path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let mut store = ProfileStore::open(&path)?;
    match args.command {
        ProfileCommand::List => {
            for name in store.names() {
                println!("{name}");
            }
        }
        ProfileCommand::Show { name, json } => {
            let profile = store
                .get(&name)
                .with_context(|| format!("no profile named '{name}'"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(profile)?);
            } else {
                print_profile(profile);
            }
        }
        ProfileCommand::Save {
            name,
            sysroot,
            app_path,
            extra_lib_paths,
            debug_paths,
            kallsyms,
            arch,
            objdump,
        } => {
            let profile = RecordProfile {
                sysroot,
                app_path,
                extra_lib_paths: split_path_list(&extra_lib_paths),
                debug_paths: split_path_list(&debug_paths),
                kallsyms,
                arch,
                objdump,
            };
            store.save(&name, profile)?;
            store.set_last_used(&name)?;
        }
        ProfileCommand::Remove { name } => store.remove(&name)?,
        ProfileCommand::Rename { old, new } => store.rename(&old, &new)?,
        ProfileCommand::LastUsed { name } => match name {
            Some(name) => store.set_last_used(&name)?,
            None => match store.last_used() {
                Some(name) => println!("{name}"),
                None => println!("(none)"),
            },
        },
    }
    Ok(())
}

fn print_profile(profile: &RecordProfile) {
    println!("sysroot:          {}", profile.sysroot);
    println!("application path: {}", profile.app_path);
    println!("extra lib paths:  {}", profile.extra_lib_path_string());
    println!("debug paths:      {}", profile.debug_path_string());
    println!("kallsyms:         {}", profile.kallsyms);
    println!(
        "architecture:     {}",
        if profile.arch.is_empty() {
            "auto-detect"
        } else {
            profile.arch.as_str()
        }
    );
    println!("objdump:          {}", profile.objdump);
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("perfdeck").join("profiles.toml"))
        .context("could not determine the user config directory")
}
