//! Stock tool bodies for fake images.

use super::ToolContext;

/// A handful of coreutils, enough to exercise file transfer.
///
/// Commands: `echo`, `cat`, `cp`, `tee`, `touch`, `mkdir`, `rm`,
/// `true`, `false`, `exit N`. A leading `/usr/bin/env` is skipped.
pub fn busybox(ctx: &mut ToolContext<'_>) -> i64 {
    let mut argv: Vec<String> = ctx.argv().to_vec();
    if argv.first().is_some_and(|a| a == "/usr/bin/env") {
        argv.remove(0);
    }
    let Some((cmd, args)) = argv.split_first() else {
        return 0;
    };

    match cmd.as_str() {
        "echo" => {
            let line = format!("{}\n", args.join(" "));
            ctx.stdout(line.as_bytes());
            0
        }
        "cat" => {
            if args.is_empty() {
                let data = ctx.read_stdin();
                ctx.stdout(&data);
                return 0;
            }
            for file in args {
                match ctx.read_file(file) {
                    Some(data) => ctx.stdout(&data),
                    None => {
                        ctx.stderr(format!("cat: {}: No such file or directory\n", file).as_bytes());
                        return 1;
                    }
                }
            }
            0
        }
        "cp" => {
            let [src, dst] = args else {
                ctx.stderr(b"cp: usage: cp SRC DST\n");
                return 2;
            };
            let Some(data) = ctx.read_file(src) else {
                ctx.stderr(format!("cp: cannot stat '{}'\n", src).as_bytes());
                return 1;
            };
            let target = if dst.ends_with('/') || ctx.is_dir(dst) {
                let name = src.rsplit('/').next().unwrap_or(src);
                format!("{}/{}", dst.trim_end_matches('/'), name)
            } else {
                dst.clone()
            };
            ctx.write_file(&target, &data);
            0
        }
        "tee" => {
            let data = ctx.read_stdin();
            for file in args {
                ctx.write_file(file, &data);
            }
            ctx.stdout(&data);
            0
        }
        "touch" => {
            for file in args {
                let data = ctx.read_file(file).unwrap_or_default();
                ctx.write_file(file, &data);
            }
            0
        }
        "mkdir" => {
            for dir in args.iter().filter(|a| !a.starts_with('-')) {
                ctx.mkdir(dir);
            }
            0
        }
        "rm" => {
            for file in args.iter().filter(|a| !a.starts_with('-')) {
                ctx.remove(file);
            }
            0
        }
        "true" => 0,
        "false" => 1,
        "exit" => args.first().and_then(|a| a.parse().ok()).unwrap_or(0),
        other => {
            ctx.stderr(format!("{}: command not found\n", other).as_bytes());
            127
        }
    }
}
