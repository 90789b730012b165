use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::voice::queue::Track;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎧 Vega Music";

/// Embed para una pista que empieza a sonar
pub fn now_starting_embed(track: &Track) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", duration_label(track), true)
        .field(
            "👤 Solicitado por",
            format!("<@{}>", track.requested_by),
            true,
        )
        .url(&track.uri)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed de "now playing" con la posición reportada por el nodo
pub fn now_playing_embed(
    track: &Track,
    position_ms: u64,
    paused: bool,
    volume: u16,
    repeat: bool,
) -> CreateEmbed {
    let progress = match track.duration_ms {
        Some(duration_ms) => format!(
            "{} / {}",
            format_timestamp(position_ms),
            format_timestamp(duration_ms)
        ),
        None => format!("{} / 🔴 En vivo", format_timestamp(position_ms)),
    };

    let status = if paused { "⏸️ Pausado" } else { "▶️ Sonando" };

    CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title))
        .color(colors::MUSIC_PURPLE)
        .field("⏱️ Progreso", progress, true)
        .field("🔊 Volumen", format!("{volume}%"), true)
        .field("Estado", status, true)
        .field(
            "🔁 Repetición",
            if repeat { "activada" } else { "desactivada" },
            true,
        )
        .field(
            "👤 Solicitado por",
            format!("<@{}>", track.requested_by),
            true,
        )
        .url(&track.uri)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed para una pista agregada a la cola
pub fn track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!("**{}** entró a la cola", track.title))
        .color(colors::SUCCESS_GREEN)
        .field("📋 Posición", format!("#{position}"), true)
        .field("⏱️ Duración", duration_label(track), true)
        .field(
            "👤 Solicitado por",
            format!("<@{}>", track.requested_by),
            true,
        )
        .url(&track.uri)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed con la cola: cabeza en reproducción y pistas pendientes
pub fn queue_embed(
    current: Option<&Track>,
    upcoming: &[Track],
    repeat: bool,
    paused: bool,
    volume: u16,
) -> CreateEmbed {
    let mut description = match current {
        Some(track) => format!("▶️ **{}** — <@{}>\n", track.title, track.requested_by),
        None => "📭 No suena nada en este momento\n".to_string(),
    };

    for (index, track) in upcoming.iter().take(10).enumerate() {
        description.push_str(&format!(
            "**{}.** {} — <@{}>\n",
            index + 1,
            track.title,
            track.requested_by
        ));
    }
    if upcoming.len() > 10 {
        description.push_str(&format!("… y {} más\n", upcoming.len() - 10));
    }

    let total_ms: u64 = current.and_then(|track| track.duration_ms).unwrap_or(0)
        + upcoming
            .iter()
            .filter_map(|track| track.duration_ms)
            .sum::<u64>();
    let total = humantime::format_duration(Duration::from_secs(total_ms / 1000));

    let mut flags = Vec::new();
    if paused {
        flags.push("⏸️ pausado");
    }
    if repeat {
        flags.push("🔁 repetición");
    }
    let footer = if flags.is_empty() {
        STANDARD_FOOTER.to_string()
    } else {
        format!("{} · {}", STANDARD_FOOTER, flags.join(" · "))
    };

    CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .description(description)
        .color(colors::INFO_BLUE)
        .field("🎶 Pendientes", upcoming.len().to_string(), true)
        .field("⏱️ Duración total", total.to_string(), true)
        .field("🔊 Volumen", format!("{volume}%"), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(footer))
}

/// Formatea milisegundos como `m:ss` o `h:mm:ss`
pub fn format_timestamp(ms: u64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

fn duration_label(track: &Track) -> String {
    match track.duration_ms {
        Some(duration_ms) => format_timestamp(duration_ms),
        None => "🔴 En vivo".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_format_like_a_player() {
        assert_eq!(format_timestamp(0), "0:00");
        assert_eq!(format_timestamp(65_000), "1:05");
        assert_eq!(format_timestamp(3_605_000), "1:00:05");
    }
}
