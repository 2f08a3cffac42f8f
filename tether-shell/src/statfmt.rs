//! Parses GNU `stat --format=%d,%i,%h,%f,%u,%g,%t,%T,%s,%o,%b,%x,%y,%z`
//! output into a [`StatT`] (§4.5). No calendar-date crate appears anywhere
//! in the corpus this workspace is grounded on, so the three timestamp
//! fields (a fixed, known format emitted by `stat` itself, not general
//! calendar input) are decoded by hand using the civil-calendar-to-days
//! algorithm from Howard Hinnant's `chrono::civil_from_days`, reproduced
//! here as a few lines of pure integer arithmetic.

use tether::error::{Cause, PathError};
use tether_proto::{StatT, Timespec};

/// The `stat --format=...` argument used to produce parseable output.
pub(crate) const FORMAT: &str = "%d,%i,%h,%f,%u,%g,%t,%T,%s,%o,%b,%x,%y,%z";

/// Parses one line of `FORMAT`-shaped `stat` output.
pub(crate) fn parse(op: &str, path: &str, line: &str) -> Result<StatT, PathError> {
    let fields: Vec<&str> = line.trim_end().splitn(14, ',').collect();
    let &[dev, ino, nlink, mode, uid, gid, rdev_major, rdev_minor, size, blksize, blocks, atime, mtime, ctime] = fields.as_slice()
    else {
        return Err(malformed(op, path, line));
    };

    let parse_dec = |s: &str| s.parse::<i64>().map_err(|_| malformed(op, path, line));
    let parse_hex = |s: &str| u64::from_str_radix(s, 16).map_err(|_| malformed(op, path, line));

    Ok(StatT {
        dev: parse_dec(dev)? as u64,
        ino: parse_dec(ino)? as u64,
        nlink: parse_dec(nlink)? as u64,
        mode: parse_hex(mode)? as u32,
        uid: parse_dec(uid)? as u32,
        gid: parse_dec(gid)? as u32,
        rdev: makedev(parse_hex(rdev_major)?, parse_hex(rdev_minor)?),
        size: parse_dec(size)?,
        blksize: parse_dec(blksize)?,
        blocks: parse_dec(blocks)?,
        atim: parse_timestamp(atime).ok_or_else(|| malformed(op, path, line))?,
        mtim: parse_timestamp(mtime).ok_or_else(|| malformed(op, path, line))?,
        ctim: parse_timestamp(ctime).ok_or_else(|| malformed(op, path, line))?,
    })
}

fn malformed(op: &str, path: &str, line: &str) -> PathError {
    PathError { op: op.to_owned(), path: path.to_owned(), cause: Cause::Transport(format!("unparseable `stat` output: {line:?}")) }
}

/// Parses one `stat %x`/`%y`/`%z` timestamp: `"2006-01-02 15:04:05.999999999 -0700"`.
fn parse_timestamp(s: &str) -> Option<Timespec> {
    let mut parts = s.split_whitespace();
    let date = parts.next()?;
    let time = parts.next()?;
    let tz = parts.next()?;

    let mut date_parts = date.splitn(3, '-');
    let year: i64 = date_parts.next()?.parse().ok()?;
    let month: i64 = date_parts.next()?.parse().ok()?;
    let day: i64 = date_parts.next()?.parse().ok()?;

    let (time_of_day, frac) = time.split_once('.').map_or((time, ""), |(t, f)| (t, f));
    let mut time_parts = time_of_day.splitn(3, ':');
    let hour: i64 = time_parts.next()?.parse().ok()?;
    let minute: i64 = time_parts.next()?.parse().ok()?;
    let second: i64 = time_parts.next()?.parse().ok()?;

    let mut nsec_digits = frac.to_owned();
    nsec_digits.truncate(9);
    while nsec_digits.len() < 9 {
        nsec_digits.push('0');
    }
    let nsec: i64 = if nsec_digits.is_empty() { 0 } else { nsec_digits.parse().ok()? };

    let tz_sign = match tz.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let tz_hour: i64 = tz.get(1..3)?.parse().ok()?;
    let tz_min: i64 = tz.get(3..5)?.parse().ok()?;
    let tz_offset_secs = tz_sign * (tz_hour * 3600 + tz_min * 60);

    let days = days_from_civil(year, month, day);
    let local_secs = days * 86400 + hour * 3600 + minute * 60 + second;
    Some(Timespec { sec: local_secs - tz_offset_secs, nsec })
}

/// Days since the Unix epoch for a proleptic-Gregorian civil date.
/// <http://howardhinnant.github.io/date_algorithms.html>
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// `gnu_dev_makedev` from glibc's `sys/sysmacros.h`: combines a hex
/// major/minor pair (as `stat %t`/`%T` report them) into a packed `rdev`.
pub(crate) fn makedev(major: u64, minor: u64) -> u64 {
    (minor & 0xff) | ((major & 0xfff) << 8) | ((minor & !0xffu64) << 12) | ((major & !0xfffu64) << 32)
}

/// `gnu_dev_major`/`gnu_dev_minor`: the inverse of [`makedev`], needed by
/// `Mknod` to recover the major/minor pair the `mknod(1)` command wants.
pub(crate) fn major_minor(rdev: u64) -> (u64, u64) {
    let major = ((rdev >> 8) & 0xfff) | ((rdev >> 32) & 0xffff_f000);
    let minor = (rdev & 0xff) | ((rdev >> 12) & 0xffff_ff00);
    (major, minor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_stat_line() {
        let line = "2049,1234,1,81a4,1000,1000,0,0,1024,4096,8,2024-01-15 10:30:45.123456789 -0500,2024-01-15 10:30:45.123456789 -0500,2024-01-15 10:30:45.123456789 -0500\n";
        let st = parse("Lstat", "/x", line).unwrap();
        assert_eq!(st.dev, 2049);
        assert_eq!(st.ino, 1234);
        assert_eq!(st.nlink, 1);
        assert_eq!(st.mode, 0x81a4);
        assert_eq!(st.uid, 1000);
        assert_eq!(st.gid, 1000);
        assert_eq!(st.size, 1024);
        assert_eq!(st.atim.nsec, 123_456_789);
    }

    #[test]
    fn parses_utc_epoch_exactly() {
        let ts = parse_timestamp("1970-01-01 00:00:00.000000000 +0000").unwrap();
        assert_eq!(ts.sec, 0);
        assert_eq!(ts.nsec, 0);
    }

    #[test]
    fn applies_timezone_offset() {
        let ts = parse_timestamp("1970-01-01 00:00:00.000000000 -0500").unwrap();
        assert_eq!(ts.sec, 5 * 3600);
    }

    #[test]
    fn makedev_major_minor_roundtrip() {
        let rdev = makedev(0x13, 0x2a);
        assert_eq!(major_minor(rdev), (0x13, 0x2a));
    }

    #[test]
    fn malformed_line_is_reported_not_panicked() {
        assert!(parse("Lstat", "/x", "not,enough,fields").is_err());
    }
}
