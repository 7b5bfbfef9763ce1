//! Runs one upload with a progress bar and keyboard controls.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};

use ferry_uploader::{
    HttpTransport, UploadControl, UploadError, UploadEvent, UploadState, Uploader,
};

use crate::args::Args;

pub async fn run(args: Args) -> anyhow::Result<()> {
    let transport = Arc::new(HttpTransport::new(args.server.as_str())?);
    let mut uploader = Uploader::new(transport, args.upload_config());
    let mut events = uploader.take_events().ok_or_else(|| anyhow::anyhow!("event stream already taken"))?;
    let control = uploader.control();

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{msg:10} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message("starting");

    // Blocking stdin reads get their own thread; it dies with the process.
    std::thread::spawn(move || read_commands(&control));

    let path = args.file.clone();
    let upload = uploader.upload(&path);
    tokio::pin!(upload);

    let result = loop {
        tokio::select! {
            result = &mut upload => break result,
            Some(event) = events.recv() => render(&bar, event),
        }
    };
    while let Ok(event) = events.try_recv() {
        render(&bar, event);
    }

    match result {
        Ok(outcome) if outcome.already_present => {
            bar.finish_with_message("done");
            println!("{} already on server", outcome.key);
            Ok(())
        }
        Ok(outcome) => {
            bar.finish_with_message("done");
            println!("uploaded {} ({} bytes)", outcome.key, outcome.size);
            Ok(())
        }
        Err(UploadError::Cancelled) => {
            bar.abandon_with_message("abandoned");
            println!("upload abandoned; run again to resume");
            Ok(())
        }
        Err(e) => {
            bar.abandon_with_message("failed");
            Err(e.into())
        }
    }
}

fn render(bar: &ProgressBar, event: UploadEvent) {
    match event {
        UploadEvent::State(state) => bar.set_message(label(state)),
        UploadEvent::Progress(snapshot) => {
            bar.set_length(snapshot.bytes_total);
            bar.set_position(snapshot.bytes_sent);
        }
        UploadEvent::Retrying {
            attempt,
            delay,
            error,
        } => {
            bar.println(format!(
                "attempt {attempt} failed ({error}); retrying in {:.1}s",
                delay.as_secs_f64()
            ));
        }
    }
}

fn label(state: UploadState) -> &'static str {
    match state {
        UploadState::NotStarted => "starting",
        UploadState::Probing => "checking",
        UploadState::Uploading => "uploading",
        UploadState::Paused => "paused",
        UploadState::Merging => "merging",
        UploadState::Completed => "done",
        UploadState::Failed => "failed",
        UploadState::Cancelled => "abandoned",
    }
}

/// Maps stdin lines to pause (`p`), resume (`r`) and abandon (`q`).
fn read_commands(control: &UploadControl) {
    for line in std::io::stdin().lines() {
        let Ok(line) = line else { return };
        match line.trim() {
            "p" | "pause" => control.pause(),
            "r" | "resume" => control.resume(),
            "q" | "quit" | "abandon" => {
                control.abandon();
                return;
            }
            "" => {}
            other => tracing::warn!(command = other, "unknown command; use p, r or q"),
        }
    }
}
