use std::{
    io::{Cursor, Write},
    mem,
};

use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::domain::{canonical_link, user_link, MediaAsset, MediaKind, PostId, RelayError, UserId};

const ENTRY_OVERHEAD: u64 = 512;
/// Room for `posts.txt` and the central directory end record.
const LISTING_ALLOWANCE: u64 = 64 * 1024;
const LISTING_NAME: &str = "posts.txt";

#[derive(Debug)]
pub struct PackedArchive {
    pub posts: Vec<(PostId, usize)>,
    pub last_index: usize,
    pub file_name: String,
    pub asset: Result<MediaAsset, RelayError>,
}

pub struct ArchiveBatcher {
    user_id: UserId,
    limit: u64,
    sequence: usize,
    pending: Vec<(PostId, Vec<MediaAsset>)>,
    pending_bytes: u64,
    last_index: usize,
}

impl ArchiveBatcher {
    pub fn new(user_id: UserId, limit: u64) -> Self {
        Self {
            user_id,
            limit,
            sequence: 0,
            pending: Vec::new(),
            pending_bytes: 0,
            last_index: 0,
        }
    }

    /// Returns the queued posts packed when `post_id` does not fit next to them.
    pub fn push(
        &mut self,
        index: usize,
        post_id: PostId,
        assets: Vec<MediaAsset>,
    ) -> Result<Option<PackedArchive>, RelayError> {
        let bytes = packed_size(&assets);
        if bytes + LISTING_ALLOWANCE > self.limit {
            return Err(RelayError::TooLarge {
                url: canonical_link(post_id),
                size: bytes,
                limit: self.limit,
            });
        }

        let flushed = if !self.pending.is_empty()
            && self.pending_bytes + bytes + LISTING_ALLOWANCE > self.limit
        {
            Some(self.flush())
        } else {
            None
        };
        self.pending.push((post_id, assets));
        self.pending_bytes += bytes;
        self.last_index = index;
        Ok(flushed)
    }

    pub fn finish(&mut self) -> Option<PackedArchive> {
        (!self.pending.is_empty()).then(|| self.flush())
    }

    fn flush(&mut self) -> PackedArchive {
        self.sequence += 1;
        let entries = mem::take(&mut self.pending);
        self.pending_bytes = 0;

        let file_name = format!("{} - {}.zip", self.user_id, self.sequence);
        let asset = pack(&entries).map(|data| MediaAsset {
            source_url: user_link(self.user_id),
            kind: MediaKind::Document,
            file_name: file_name.clone(),
            width: None,
            height: None,
            data,
        });
        PackedArchive {
            posts: entries.iter().map(|(id, assets)| (*id, assets.len())).collect(),
            last_index: self.last_index,
            file_name,
            asset,
        }
    }
}

fn packed_size(assets: &[MediaAsset]) -> u64 {
    assets.iter().map(|asset| asset.size() + ENTRY_OVERHEAD).sum()
}

fn stored() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
}

fn pack(entries: &[(PostId, Vec<MediaAsset>)]) -> Result<Vec<u8>, RelayError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut listing = String::new();
    for (post_id, assets) in entries {
        listing.push_str(&format!("{post_id}\n"));
        for asset in assets {
            zip.start_file(asset.file_name.as_str(), stored())
                .map_err(archive_error)?;
            zip.write_all(&asset.data).map_err(archive_error)?;
        }
    }
    zip.start_file(LISTING_NAME, stored()).map_err(archive_error)?;
    zip.write_all(listing.as_bytes()).map_err(archive_error)?;
    Ok(zip.finish().map_err(archive_error)?.into_inner())
}

fn archive_error(err: impl std::fmt::Display) -> RelayError {
    RelayError::Media {
        reason: format!("archive: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;

    const LIMIT: u64 = 150_000;

    fn asset(post_id: PostId, size: usize) -> MediaAsset {
        MediaAsset {
            source_url: format!("https://i.pximg.net/{post_id}_p0.jpg"),
            kind: MediaKind::Image,
            file_name: format!("{post_id}_p0.jpg"),
            width: None,
            height: None,
            data: vec![7; size],
        }
    }

    fn entry_names(archive: &PackedArchive) -> (Vec<String>, String) {
        let data = &archive.asset.as_ref().expect("archive packed").data;
        let mut zip = ZipArchive::new(Cursor::new(data.as_slice())).expect("valid zip");
        let names = zip.file_names().map(str::to_string).collect::<Vec<_>>();
        let mut listing = String::new();
        zip.by_name(LISTING_NAME)
            .expect("listing present")
            .read_to_string(&mut listing)
            .expect("listing reads");
        (names, listing)
    }

    #[test]
    fn posts_are_batched_under_the_limit() {
        let mut batcher = ArchiveBatcher::new(77, LIMIT);
        assert!(batcher.push(1, 1, vec![asset(1, 40_000)]).expect("fits").is_none());
        assert!(batcher.push(2, 2, vec![asset(2, 40_000)]).expect("fits").is_none());

        let first = batcher
            .push(3, 3, vec![asset(3, 40_000)])
            .expect("fits")
            .expect("earlier posts flushed");
        assert_eq!(first.posts, vec![(1, 1), (2, 1)]);
        assert_eq!(first.last_index, 2);
        assert_eq!(first.file_name, "77 - 1.zip");
        let (names, listing) = entry_names(&first);
        assert!(names.contains(&"1_p0.jpg".to_string()));
        assert!(names.contains(&"2_p0.jpg".to_string()));
        assert_eq!(listing, "1\n2\n");
        assert!(first.asset.as_ref().expect("packed").size() <= LIMIT);

        let last = batcher.finish().expect("remaining post flushed");
        assert_eq!(last.posts, vec![(3, 1)]);
        assert_eq!(last.last_index, 3);
        assert_eq!(last.file_name, "77 - 2.zip");
        assert!(batcher.finish().is_none());
    }

    #[test]
    fn post_larger_than_an_archive_is_rejected() {
        let mut batcher = ArchiveBatcher::new(77, LIMIT);
        let err = batcher.push(1, 9, vec![asset(9, 100_000)]).unwrap_err();
        assert!(matches!(err, RelayError::TooLarge { .. }));
        assert!(batcher.finish().is_none());
    }
}
