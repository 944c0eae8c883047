use terrasync_mirror::SceneryVersion;

pub fn is_numeric_min(min: usize) -> impl Fn(String) -> Result<(), String> {
    move |v: String| {
        let val = v
            .parse::<usize>()
            .map_err(|_| "must be numeric".to_owned())?;

        if val < min {
            return Err(format!("must be >= {}", min));
        }

        Ok(())
    }
}

pub fn is_u8(v: String) -> Result<(), String> {
    v.parse::<u8>()
        .map(|_| ())
        .map_err(|_| "must be a number between 0 and 255".to_owned())
}

fn is_coord_within(v: &str, limit: f64) -> Result<(), String> {
    let val = v.parse::<f64>().map_err(|_| "must be numeric".to_owned())?;

    if val < -limit {
        return Err(format!("must be >= -{}°", limit));
    } else if val > limit {
        return Err(format!("must be <= {}°", limit));
    }

    Ok(())
}

pub fn is_latitude(v: String) -> Result<(), String> {
    is_coord_within(&v, 90f64)
}

pub fn is_longitude(v: String) -> Result<(), String> {
    is_coord_within(&v, 180f64)
}

pub fn is_radius(v: String) -> Result<(), String> {
    match v.parse::<f64>() {
        Ok(val) if val >= 0f64 && val.is_finite() => Ok(()),
        Ok(_) => Err("must be a non-negative number of miles".to_owned()),
        Err(_) => Err("must be numeric".to_owned()),
    }
}

pub fn is_scenery_version(v: String) -> Result<(), String> {
    v.parse::<SceneryVersion>().map(|_| ())
}

pub fn is_http_url(v: String) -> Result<(), String> {
    if v.starts_with("http://") || v.starts_with("https://") {
        Ok(())
    } else {
        Err("must be an http(s) URL".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates() {
        assert!(is_latitude("-90".into()).is_ok());
        assert!(is_latitude("90.5".into()).is_err());
        assert!(is_longitude("-180".into()).is_ok());
        assert!(is_longitude("north".into()).is_err());
    }

    #[test]
    fn numbers() {
        assert!(is_numeric_min(1)("0".into()).is_err());
        assert!(is_numeric_min(1)("8".into()).is_ok());
        assert!(is_u8("256".into()).is_err());
        assert!(is_radius("0".into()).is_ok());
        assert!(is_radius("-1".into()).is_err());
    }

    #[test]
    fn versions_and_urls() {
        assert!(is_scenery_version("WS3".into()).is_ok());
        assert!(is_scenery_version("ws1".into()).is_err());
        assert!(is_http_url("https://example.org/terrasync".into()).is_ok());
        assert!(is_http_url("ftp://example.org".into()).is_err());
    }
}
