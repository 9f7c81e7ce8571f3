//! Date and time values in the binary and text protocol
use bytes::BufMut;

use crate::package_parser::{DecodeError, DecodeResult, PackageParser};

/// A DATE, DATETIME or TIMESTAMP value
///
/// Zero dates like `0000-00-00` are representable, so this is not a calendar type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DateTime {
    #[allow(missing_docs)]
    pub year: u16,
    #[allow(missing_docs)]
    pub month: u8,
    #[allow(missing_docs)]
    pub day: u8,
    #[allow(missing_docs)]
    pub hour: u8,
    #[allow(missing_docs)]
    pub minute: u8,
    #[allow(missing_docs)]
    pub second: u8,
    #[allow(missing_docs)]
    pub microsecond: u32,
}

/// A TIME value, which is a signed duration that may exceed 24 hours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Time {
    /// The duration is negative
    pub negative: bool,
    /// Hours, including whole days
    pub hours: u32,
    #[allow(missing_docs)]
    pub minutes: u8,
    #[allow(missing_docs)]
    pub seconds: u8,
    #[allow(missing_docs)]
    pub microseconds: u32,
}

impl DateTime {
    /// Construct a date with zero time of day
    pub fn date(year: u16, month: u8, day: u8) -> Self {
        DateTime {
            year,
            month,
            day,
            ..Default::default()
        }
    }

    /// Set the time of day
    pub fn with_time(self, hour: u8, minute: u8, second: u8, microsecond: u32) -> Self {
        DateTime {
            hour,
            minute,
            second,
            microsecond,
            ..self
        }
    }

    /// Number of bytes following the length byte in the binary protocol
    pub fn binary_len(&self) -> u8 {
        if self.microsecond != 0 {
            11
        } else if self.hour != 0 || self.minute != 0 || self.second != 0 {
            7
        } else if self.year != 0 || self.month != 0 || self.day != 0 {
            4
        } else {
            0
        }
    }

    /// Write the length byte followed by the shortest binary form
    pub fn encode_binary(&self, buf: &mut impl BufMut) {
        let len = self.binary_len();
        buf.put_u8(len);
        if len >= 4 {
            buf.put_u16_le(self.year);
            buf.put_u8(self.month);
            buf.put_u8(self.day);
        }
        if len >= 7 {
            buf.put_u8(self.hour);
            buf.put_u8(self.minute);
            buf.put_u8(self.second);
        }
        if len == 11 {
            buf.put_u32_le(self.microsecond);
        }
    }

    /// Decode the bytes following the length byte
    pub fn decode_binary(body: &[u8]) -> DecodeResult<Self> {
        let mut p = PackageParser::new(body);
        let mut v = DateTime::default();
        match body.len() {
            0 => (),
            4 | 7 | 11 => {
                v.year = p.get_u16()?;
                v.month = p.get_u8()?;
                v.day = p.get_u8()?;
                if body.len() >= 7 {
                    v.hour = p.get_u8()?;
                    v.minute = p.get_u8()?;
                    v.second = p.get_u8()?;
                }
                if body.len() == 11 {
                    v.microsecond = p.get_u32()?;
                }
            }
            l => return Err(DecodeError::InvalidSize(l as u8)),
        }
        Ok(v)
    }

    /// Parse `YYYY-MM-DD[ HH:MM:SS[.ffffff]]`
    pub fn parse_text(s: &[u8]) -> DecodeResult<Self> {
        let mut d = Digits(s);
        let year = d.field(4)?;
        d.sep(b'-')?;
        let month = d.field(2)?;
        d.sep(b'-')?;
        let day = d.field(2)?;
        let mut v = DateTime::date(year, month, day);
        if d.0.is_empty() {
            return Ok(v);
        }
        if !matches!(d.0.first(), Some(b' ' | b'T')) {
            return Err(DecodeError::InvalidValue);
        }
        d.0 = &d.0[1..];
        v.hour = d.field(2)?;
        d.sep(b':')?;
        v.minute = d.field(2)?;
        d.sep(b':')?;
        v.second = d.field(2)?;
        v.microsecond = d.fraction()?;
        d.end()?;
        Ok(v)
    }
}

impl std::fmt::Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        if self.microsecond != 0 {
            write!(f, ".{:06}", self.microsecond)?;
        }
        Ok(())
    }
}

impl Time {
    /// Construct a positive time
    pub fn new(hours: u32, minutes: u8, seconds: u8, microseconds: u32) -> Self {
        Time {
            negative: false,
            hours,
            minutes,
            seconds,
            microseconds,
        }
    }

    /// Number of bytes following the length byte in the binary protocol
    pub fn binary_len(&self) -> u8 {
        if self.microseconds != 0 {
            12
        } else if self.hours != 0 || self.minutes != 0 || self.seconds != 0 {
            8
        } else {
            0
        }
    }

    /// Write the length byte followed by the shortest binary form
    ///
    /// Whole days are moved out of the hours as the protocol requires
    pub fn encode_binary(&self, buf: &mut impl BufMut) {
        let len = self.binary_len();
        buf.put_u8(len);
        if len >= 8 {
            buf.put_u8(self.negative.into());
            buf.put_u32_le(self.hours / 24);
            buf.put_u8((self.hours % 24) as u8);
            buf.put_u8(self.minutes);
            buf.put_u8(self.seconds);
        }
        if len == 12 {
            buf.put_u32_le(self.microseconds);
        }
    }

    /// Decode the bytes following the length byte
    pub fn decode_binary(body: &[u8]) -> DecodeResult<Self> {
        let mut p = PackageParser::new(body);
        let mut v = Time::default();
        match body.len() {
            0 => (),
            8 | 12 => {
                v.negative = p.get_u8()? != 0;
                let days = p.get_u32()?;
                let hours: u32 = p.get_u8()?.into();
                v.hours = days
                    .checked_mul(24)
                    .and_then(|d| d.checked_add(hours))
                    .ok_or(DecodeError::OutOfRange)?;
                v.minutes = p.get_u8()?;
                v.seconds = p.get_u8()?;
                if body.len() == 12 {
                    v.microseconds = p.get_u32()?;
                }
            }
            l => return Err(DecodeError::InvalidSize(l as u8)),
        }
        Ok(v)
    }

    /// Parse `[-]H+:MM:SS[.ffffff]`
    pub fn parse_text(s: &[u8]) -> DecodeResult<Self> {
        let mut d = Digits(s);
        let negative = d.0.first() == Some(&b'-');
        if negative {
            d.0 = &d.0[1..];
        }
        let hours = d.field(1)?;
        d.sep(b':')?;
        let minutes = d.field(2)?;
        d.sep(b':')?;
        let seconds = d.field(2)?;
        let microseconds = d.fraction()?;
        d.end()?;
        Ok(Time {
            negative,
            hours,
            minutes,
            seconds,
            microseconds,
        })
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)?;
        if self.microseconds != 0 {
            write!(f, ".{:06}", self.microseconds)?;
        }
        Ok(())
    }
}

/// Digit by digit scanner for temporal text values
struct Digits<'a>(&'a [u8]);

impl Digits<'_> {
    /// Read a run of at least `min` digits
    fn number(&mut self, min: usize) -> DecodeResult<u64> {
        let len = self.0.iter().take_while(|c| c.is_ascii_digit()).count();
        if len < min || len > 10 {
            return Err(DecodeError::InvalidValue);
        }
        let v = self.0[..len]
            .iter()
            .fold(0u64, |acc, c| acc * 10 + u64::from(c - b'0'));
        self.0 = &self.0[len..];
        Ok(v)
    }

    /// Read a number of at least `min` digits that fits in `T`
    fn field<T: TryFrom<u64>>(&mut self, min: usize) -> DecodeResult<T> {
        T::try_from(self.number(min)?).map_err(|_| DecodeError::OutOfRange)
    }

    /// Consume the separator
    fn sep(&mut self, c: u8) -> DecodeResult<()> {
        match self.0.split_first() {
            Some((v, rest)) if *v == c => {
                self.0 = rest;
                Ok(())
            }
            _ => Err(DecodeError::InvalidValue),
        }
    }

    /// Read an optional `.ffffff` part as microseconds
    fn fraction(&mut self) -> DecodeResult<u32> {
        if self.0.first() != Some(&b'.') {
            return Ok(0);
        }
        self.0 = &self.0[1..];
        let len = self.0.iter().take_while(|c| c.is_ascii_digit()).count();
        if len == 0 || len > 6 {
            return Err(DecodeError::InvalidValue);
        }
        let mut v = 0u32;
        for i in 0..6 {
            v = v * 10 + self.0.get(i).filter(|_| i < len).map_or(0, |c| u32::from(c - b'0'));
        }
        self.0 = &self.0[len..];
        Ok(v)
    }

    /// Check that everything has been consumed
    fn end(&self) -> DecodeResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::InvalidValue)
        }
    }
}
