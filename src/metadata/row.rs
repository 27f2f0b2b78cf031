//! Row decoding: turning one table row into a `MetadataRecord`.
//!
//! Every cell is text. Each recognised heading is coerced into a typed
//! `Field`; a cell that fails coercion is logged and dropped without
//! touching the rest of the row.

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::catalog::codec::split_extension;
use crate::metadata::sort_title::sort_title;
use crate::metadata::{Actor, MetadataRecord, Thumb};

lazy_static! {
    static ref IMDB_TITLE: Regex =
        Regex::new(r"^https?://(?:www\.)?imdb\.com/title/([[:alnum:]]+)").unwrap();
}

/// Kodi image aspects accepted as headings
pub const THUMB_ASPECTS: [&str; 6] = ["banner", "clearart", "clearlogo", "discart", "landscape", "poster"];

/// Why a single cell was rejected
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("cannot parse {heading} {value:?}: {source}")]
    InvalidInteger {
        heading: String,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("cannot parse trailer URL {value:?}: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("trailer URL {0:?} is not a YouTube link")]
    NotYouTube(String),

    #[error("no YouTube video id in trailer URL {0:?}")]
    MissingVideoId(String),
}

/// One decoded cell
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Title(String),
    SortTitle(String),
    Year(u32),
    Thumb { aspect: String, source_url: String },
    Directors(Vec<String>),
    Actors(Vec<String>),
    Runtime(u32),
    Trailer(String),
    Outline(String),
    Plot(String),
    Tagline(String),
    Genre(String),
    Subdir(String),
    ImdbId(String),
    /// Heading we do not know about
    Ignored,
}

/// Decode a single non-empty cell according to its heading.
pub fn decode_field(heading: &str, value: &str) -> Result<Field, FieldError> {
    let field = match heading {
        "title" => Field::Title(value.to_string()),
        "sort" => Field::SortTitle(value.to_lowercase()),
        "year" => Field::Year(parse_int(heading, value)?),
        "runtime" => Field::Runtime(parse_int(heading, value)?),
        aspect if THUMB_ASPECTS.contains(&aspect) => Field::Thumb {
            aspect: aspect.to_string(),
            source_url: value.to_string(),
        },
        "directors" => Field::Directors(split_semi(value)),
        "actors" => Field::Actors(split_semi(value)),
        "trailer" => Field::Trailer(youtube_plugin_url(value)?),
        "outline" => Field::Outline(value.to_string()),
        "plot" => Field::Plot(value.to_string()),
        "tagline" => Field::Tagline(value.to_string()),
        "genre" => Field::Genre(value.to_string()),
        "subdir" => Field::Subdir(value.to_string()),
        "imdbid" => Field::ImdbId(parse_imdb_id(value)),
        _ => Field::Ignored,
    };
    Ok(field)
}

fn parse_int(heading: &str, value: &str) -> Result<u32, FieldError> {
    value.parse::<u32>().map_err(|source| FieldError::InvalidInteger {
        heading: heading.to_string(),
        value: value.to_string(),
        source,
    })
}

fn split_semi(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reduce an IMDb title URL to its id; anything else is taken as the id itself.
pub fn parse_imdb_id(value: &str) -> String {
    match IMDB_TITLE.captures(value) {
        Some(caps) => caps[1].to_string(),
        None => value.to_string(),
    }
}

/// Convert a YouTube watch link into a Kodi YouTube plugin URL.
pub fn youtube_plugin_url(value: &str) -> Result<String, FieldError> {
    let url = Url::parse(value).map_err(|source| FieldError::InvalidUrl {
        value: value.to_string(),
        source,
    })?;

    let video_id = match url.host_str() {
        Some("www.youtube.com") | Some("youtube.com") => {
            if url.path().trim_start_matches('/') != "watch" {
                return Err(FieldError::NotYouTube(value.to_string()));
            }
            url.query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default()
        }
        Some("youtu.be") => url.path().trim_start_matches('/').to_string(),
        _ => return Err(FieldError::NotYouTube(value.to_string())),
    };

    if video_id.is_empty() {
        return Err(FieldError::MissingVideoId(value.to_string()));
    }
    Ok(format!("plugin://plugin.video.youtube/?action=play_video&videoid={}", video_id))
}

/// Builds records from table rows
#[derive(Debug, Clone)]
pub struct RowDecoder {
    thumb_base: Url,
}

impl RowDecoder {
    /// `thumb_base` is the externally visible root of this server.
    pub fn new(thumb_base: Url) -> Self {
        Self { thumb_base }
    }

    /// Decode a row whose first cell is the object name.
    ///
    /// Returns the root name and the record. Cells beyond the headings are
    /// ignored, as are empty ones.
    pub fn decode_row(&self, headings: &[String], row: &[String]) -> (String, MetadataRecord) {
        let name = row.first().map(|s| s.trim()).unwrap_or_default();
        let (root_name, _) = split_extension(name);
        let mut record = MetadataRecord::default();

        for (heading, value) in headings.iter().zip(row.iter()).skip(1) {
            if value.is_empty() {
                continue;
            }
            match decode_field(heading, value) {
                Ok(field) => self.apply(&mut record, root_name, field),
                Err(e) => warn!("Skipping {} for {}: {}", heading, name, e),
            }
        }

        if record.title.is_empty() {
            record.title = root_name.to_string();
        }
        if record.sort_title.is_empty() {
            record.sort_title = sort_title(&record.title);
        }
        (root_name.to_string(), record)
    }

    fn apply(&self, record: &mut MetadataRecord, root_name: &str, field: Field) {
        match field {
            Field::Title(v) => record.title = v,
            Field::SortTitle(v) => record.sort_title = v,
            Field::Year(v) => record.year = Some(v),
            Field::Runtime(v) => record.runtime = Some(v),
            Field::Thumb { aspect, source_url } => {
                let thumb = if record.thumbs.is_empty() {
                    self.proxied_thumb(root_name, aspect, source_url)
                } else {
                    Thumb { aspect, url: source_url.clone(), source_url, proxy_name: None }
                };
                record.thumbs.push(thumb);
            }
            Field::Directors(names) => record.directors.extend(names),
            Field::Actors(names) => {
                for name in names {
                    let order = record.actors.len();
                    record.actors.push(Actor { name, role: String::new(), order });
                }
            }
            Field::Trailer(v) => record.trailer = v,
            Field::Outline(v) => record.outline = v,
            Field::Plot(v) => record.plot = v,
            Field::Tagline(v) => record.tagline = v,
            Field::Genre(v) => record.genre = v,
            Field::Subdir(v) => record.subdir = v,
            Field::ImdbId(v) => record.imdb_id = v,
            Field::Ignored => {}
        }
    }

    /// The first image of a title is served through `/thumbs/<root><ext>`.
    fn proxied_thumb(&self, root_name: &str, aspect: String, source_url: String) -> Thumb {
        let (_, ext) = split_extension(&source_url);
        let proxy_name = format!("{}{}", root_name, ext);

        let mut url = self.thumb_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("thumbs").push(&proxy_name);
        }

        Thumb {
            aspect,
            url: url.to_string(),
            source_url,
            proxy_name: Some(proxy_name),
        }
    }
}
