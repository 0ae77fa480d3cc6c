use {
    indicatif::{ProgressBar, ProgressStyle},
    log::{info, warn, LevelFilter},
    niconico_dmc::{
        error::Error,
        model::{format::FormatRecord, session::SessionDescriptor, ResolvedVideo},
        Niconico,
    },
    serde::Serialize,
    std::{path::PathBuf, time::Duration},
};

pub mod config;

pub struct DownloadOptions {
    pub url: String,
    pub format: Option<String>,
    pub list_formats: bool,
    pub json: bool,
    pub hold: bool,
    pub user_session: Option<String>,
    pub user_agent: Option<String>,
    pub ffprobe_path: PathBuf,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct Output<'a> {
    video: &'a ResolvedVideo,
    selected: &'a FormatRecord,
    session: Option<&'a SessionDescriptor>,
}

pub async fn resolve_niconico(
    options: DownloadOptions,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let niconico = Niconico::with_defaults(
        options.user_agent.as_deref(),
        options.timeout,
        options.ffprobe_path.clone(),
        options.user_session.as_deref(),
    )?;

    let video = niconico.resolve(&options.url).await?;
    info!("{}", video);

    if options.list_formats {
        print!("{}", format_table(&video));
        return Ok(());
    }

    let selected = select_format(&video, options.format.as_deref())?;
    let (format, session) = if selected.needs_session() {
        let endpoint = video
            .endpoint
            .as_ref()
            .ok_or(Error::Precondition("session_api"))?;
        let negotiated = niconico
            .negotiate_any(fallback_chain(&video, selected), endpoint)
            .await?;
        if negotiated.format.format_id != selected.format_id {
            warn!(
                "Format {} was refused, using {}",
                selected.format_id, negotiated.format.format_id
            );
        }
        (negotiated.format, Some(negotiated.session))
    } else {
        (selected.clone(), None)
    };

    if options.json {
        let output = Output {
            video: &video,
            selected: &format,
            session: session.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", format.url);
    }

    if options.hold {
        match &session {
            Some(session) => hold_session(&niconico, session).await?,
            None => info!("Format {} needs no session", format.format_id),
        }
    }

    Ok(())
}

async fn hold_session(
    niconico: &Niconico,
    session: &SessionDescriptor,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let heartbeat = niconico.start_heartbeat(session)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")?);
    spinner.set_message(format!(
        "Keeping session {} alive, Ctrl-C to stop",
        session.session_id
    ));
    spinner.enable_steady_tick(Duration::from_millis(120));

    tokio::signal::ctrl_c().await?;

    heartbeat.stop();
    spinner.finish_with_message("Session released");
    Ok(())
}

/// The requested format, or the best one.
pub fn select_format<'a>(
    video: &'a ResolvedVideo,
    requested: Option<&str>,
) -> Result<&'a FormatRecord, Box<dyn std::error::Error + Send + Sync>> {
    match requested {
        Some(id) => video
            .format(id)
            .ok_or_else(|| format!("Requested format {} is not available", id).into()),
        None => Ok(video.best_format().ok_or(Error::NoPlayableFormat)?),
    }
}

/// The selected format first, then the other session formats from best to worst.
pub fn fallback_chain<'a>(video: &'a ResolvedVideo, selected: &'a FormatRecord) -> Vec<&'a FormatRecord> {
    let mut chain = vec![selected];
    chain.extend(
        video
            .session_formats()
            .into_iter()
            .filter(|format| format.format_id != selected.format_id),
    );
    chain
}

pub fn format_table(video: &ResolvedVideo) -> String {
    let mut table = format!(
        "{:<40} {:<5} {:<10} {:>7} {:>7} {:<12} {}\n",
        "ID", "EXT", "RES", "VBR", "ABR", "PROTO", "NOTE"
    );
    for format in video.formats.iter().rev() {
        let resolution = match (format.video_resolution.width, format.video_resolution.height) {
            (Some(width), Some(height)) => format!("{}x{}", width, height),
            (None, Some(height)) => format!("{}p", height),
            _ => "audio only".to_string(),
        };
        let rate = |rate: Option<f64>| rate.map(|r| format!("{:.0}k", r)).unwrap_or_default();

        table.push_str(&format!(
            "{:<40} {:<5} {:<10} {:>7} {:>7} {:<12} {}\n",
            format.format_id,
            format.ext,
            resolution,
            rate(format.vbr()),
            rate(format.abr()),
            format.protocol.to_string(),
            format.format_note.as_deref().unwrap_or_default()
        ));
    }
    table
}

/// Whether the error only says the video cannot be watched, so it needs no error log.
pub fn is_unavailable(error: &(dyn std::error::Error + Send + Sync + 'static)) -> bool {
    error.downcast_ref::<Error>().is_some_and(Error::is_expected)
}

pub fn level_filter(verbosity: &str) -> LevelFilter {
    match verbosity {
        "none" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "debug" => LevelFilter::Debug,
        "full" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use niconico_dmc::model::{Protocol, RatesInfo, Resolution, VideoInfo};
    use std::collections::BTreeMap;

    fn format(id: &str, quality: i32, height: u32, protocol: Protocol) -> FormatRecord {
        FormatRecord {
            format_id: id.to_string(),
            url: String::new(),
            ext: "mp4".to_string(),
            container: None,
            format_note: None,
            codec_info: Default::default(),
            rates_info: RatesInfo::default(),
            video_resolution: Resolution {
                width: None,
                height: Some(height),
            },
            quality: Some(quality),
            source_preference: None,
            filesize: None,
            protocol,
            http_headers: BTreeMap::new(),
        }
    }

    fn video() -> ResolvedVideo {
        ResolvedVideo {
            info: VideoInfo::default(),
            formats: vec![
                format("h264_360p_low-aac_64kbps", -2, 360, Protocol::NiconicoDmc),
                format("h264_360p-aac_64kbps", -1, 360, Protocol::NiconicoDmc),
                format("h264_720p-aac_128kbps", -1, 720, Protocol::NiconicoDmc),
            ],
            endpoint: None,
        }
    }

    #[test]
    fn best_format_by_default() {
        let video = video();
        assert_eq!(
            select_format(&video, None).unwrap().format_id,
            "h264_720p-aac_128kbps"
        );
        assert_eq!(
            select_format(&video, Some("h264_360p-aac_64kbps")).unwrap().format_id,
            "h264_360p-aac_64kbps"
        );
        assert!(select_format(&video, Some("smile")).is_err());
    }

    #[test]
    fn chain_starts_with_the_selection() {
        let video = video();
        let selected = video.format("h264_360p-aac_64kbps").unwrap();

        let chain: Vec<_> = fallback_chain(&video, selected)
            .iter()
            .map(|f| f.format_id.as_str())
            .collect();
        assert_eq!(
            chain,
            [
                "h264_360p-aac_64kbps",
                "h264_720p-aac_128kbps",
                "h264_360p_low-aac_64kbps"
            ]
        );
    }

    #[test]
    fn table_lists_best_first() {
        let table = format_table(&video());
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].starts_with("h264_720p-aac_128kbps"));
        assert!(lines[1].contains("720p"));
        assert!(lines[3].contains("niconico_dmc"));
    }

    #[test]
    fn unavailable_videos_are_not_failures() {
        let deleted: Box<dyn std::error::Error + Send + Sync> = Box::new(Error::Deleted);
        assert!(is_unavailable(deleted.as_ref()));

        let refused: Box<dyn std::error::Error + Send + Sync> = Box::new(Error::NoPlayableFormat);
        assert!(!is_unavailable(refused.as_ref()));

        let other: Box<dyn std::error::Error + Send + Sync> = "Requested format smile is not available".into();
        assert!(!is_unavailable(other.as_ref()));
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_filter("none"), LevelFilter::Off);
        assert_eq!(level_filter("full"), LevelFilter::Trace);
        assert_eq!(level_filter("info"), LevelFilter::Info);
    }
}
