use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::CacheService;
use crate::error::ApiError;
use crate::models::showtime::{LayoutRow, Showtime, ShowtimeWithCinema};
use crate::models::{Movie, SeatType};
use crate::pricing;
use crate::services::seat_map::SeatMap;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/movies", get(list_movies))
        .route("/movies/{id}", get(get_movie))
        .route("/showtimes", get(list_showtimes).post(create_showtime))
        .route("/showtimes/{id}/seats", get(get_seat_availability))
        .route("/concessions", get(list_concessions))
}

fn cached_response(json: String, hit: bool) -> Response {
    Response::builder()
        .header("Content-Type", "application/json")
        .header("X-Cache", if hit { "HIT" } else { "MISS" })
        .body(Body::from(json))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/* ---------- MOVIES ---------- */

#[derive(Debug, Deserialize)]
struct MoviesQuery {
    genre: Option<String>,
    language: Option<String>,
}

// GET /api/movies?genre=&language=
async fn list_movies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MoviesQuery>,
) -> Result<Response, ApiError> {
    let genre = params.genre.as_deref().filter(|g| *g != "all");
    let language = params.language.as_deref().filter(|l| *l != "all");

    let cache_key = CacheService::movies_key(genre, language);
    if let Some(cached) = state.cache.get_cached_json(&cache_key).await {
        return Ok(cached_response(cached, true));
    }

    // Динамическая сборка фильтров, как в карте зала
    let mut q = String::from("SELECT * FROM movies WHERE TRUE");
    let mut bind_idx = 1;
    if genre.is_some() {
        q.push_str(&format!(" AND ${} = ANY(genres)", bind_idx));
        bind_idx += 1;
    }
    if language.is_some() {
        q.push_str(&format!(" AND language = ${}", bind_idx));
    }
    q.push_str(" ORDER BY title");

    let mut dbq = sqlx::query_as::<_, Movie>(&q);
    if let Some(g) = genre {
        dbq = dbq.bind(g.to_string());
    }
    if let Some(l) = language {
        dbq = dbq.bind(l.to_string());
    }

    let movies = dbq.fetch_all(&state.db.pool).await?;

    let json = serde_json::to_string(&movies)
        .map_err(|e| ApiError::Internal(format!("failed to encode movies: {}", e)))?;
    state.cache.cache_catalog(&cache_key, &json).await;

    Ok(cached_response(json, false))
}

// GET /api/movies/{id}
async fn get_movie(
    State(state): State<Arc<AppState>>,
    Path(movie_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let movie = sqlx::query_as::<_, Movie>("SELECT * FROM movies WHERE id = $1")
        .bind(movie_id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("Фильм не найден".to_string()))?;

    Ok(Json(movie))
}

/* ---------- SHOWTIMES ---------- */

#[derive(Debug, Deserialize)]
struct ShowtimesQuery {
    #[serde(rename = "movieId")]
    movie_id: Option<Uuid>,
    date: Option<String>,
    #[serde(rename = "cinemaId")]
    cinema_id: Option<Uuid>,
}

// GET /api/showtimes?movieId=&date=&cinemaId=
async fn list_showtimes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ShowtimesQuery>,
) -> Result<Response, ApiError> {
    let movie_id = params
        .movie_id
        .ok_or_else(|| ApiError::InvalidInput("параметр movieId обязателен".to_string()))?;

    let date = match params.date.as_deref() {
        Some(s) => Some(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
            ApiError::InvalidInput("date должен быть в формате YYYY-MM-DD".to_string())
        })?),
        None => None,
    };

    let cache_key = CacheService::showtimes_key(
        movie_id,
        params.date.as_deref(),
        params.cinema_id.map(|c| c.to_string()).as_deref(),
    );
    if let Some(cached) = state.cache.get_cached_json(&cache_key).await {
        return Ok(cached_response(cached, true));
    }

    let mut q = String::from(
        "SELECT st.id, st.movie_id, st.screen_id, st.show_date, st.show_time,
                st.base_price, st.format,
                c.id AS cinema_id, c.name AS cinema_name, c.location AS cinema_location
         FROM showtimes st
         JOIN screens sc ON sc.id = st.screen_id
         JOIN cinemas c ON c.id = sc.cinema_id
         WHERE st.movie_id = $1",
    );
    let mut bind_idx = 2;
    if date.is_some() {
        q.push_str(&format!(" AND st.show_date = ${}", bind_idx));
        bind_idx += 1;
    }
    if params.cinema_id.is_some() {
        q.push_str(&format!(" AND c.id = ${}", bind_idx));
    }
    q.push_str(" ORDER BY st.show_time");

    let mut dbq = sqlx::query_as::<_, ShowtimeWithCinema>(&q).bind(movie_id);
    if let Some(d) = date {
        dbq = dbq.bind(d);
    }
    if let Some(c) = params.cinema_id {
        dbq = dbq.bind(c);
    }

    let showtimes = dbq.fetch_all(&state.db.pool).await?;

    let json = serde_json::to_string(&showtimes)
        .map_err(|e| ApiError::Internal(format!("failed to encode showtimes: {}", e)))?;
    state.cache.cache_catalog(&cache_key, &json).await;

    Ok(cached_response(json, false))
}

#[derive(Debug, Deserialize)]
struct CreateShowtimeRequest {
    movie_id: Uuid,
    screen_id: Uuid,
    show_date: String,
    show_time: String,
    base_price: i64,
    format: Option<String>,
}

// POST /api/showtimes
//
// Создаёт сеанс и сразу материализует все места зала: "свободно" - это
// реальная строка, а не отсутствие записи.
async fn create_showtime(
    State(state): State<Arc<AppState>>,
    _user: crate::middleware::AuthUser,
    Json(req): Json<CreateShowtimeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let show_date = NaiveDate::parse_from_str(&req.show_date, "%Y-%m-%d").map_err(|_| {
        ApiError::InvalidInput("show_date должен быть в формате YYYY-MM-DD".to_string())
    })?;
    let show_time = NaiveTime::parse_from_str(&req.show_time, "%H:%M").map_err(|_| {
        ApiError::InvalidInput("show_time должен быть в формате HH:MM".to_string())
    })?;
    if req.base_price <= 0 {
        return Err(ApiError::InvalidInput(
            "base_price должен быть > 0".to_string(),
        ));
    }

    let movie_exists =
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM movies WHERE id = $1)")
            .bind(req.movie_id)
            .fetch_one(&state.db.pool)
            .await?;
    if !movie_exists {
        return Err(ApiError::NotFound("Фильм не найден".to_string()));
    }

    let mut tx = state.db.pool.begin().await?;

    let layout_json = sqlx::query_scalar::<_, serde_json::Value>(
        "SELECT layout FROM screens WHERE id = $1",
    )
    .bind(req.screen_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::NotFound("Зал не найден".to_string()))?;

    let layout: Vec<LayoutRow> = serde_json::from_value(layout_json)
        .map_err(|e| ApiError::Internal(format!("malformed screen layout: {}", e)))?;

    let showtime = sqlx::query_as::<_, Showtime>(
        "INSERT INTO showtimes (movie_id, screen_id, show_date, show_time, base_price, format)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *",
    )
    .bind(req.movie_id)
    .bind(req.screen_id)
    .bind(show_date)
    .bind(show_time)
    .bind(req.base_price)
    .bind(req.format.unwrap_or_else(|| "standard".to_string()))
    .fetch_one(&mut *tx)
    .await?;

    // Разворачиваем план зала в строки мест
    let mut row_labels = Vec::new();
    let mut numbers = Vec::new();
    let mut seat_types = Vec::new();
    let mut prices = Vec::new();
    for row in &layout {
        let seat_type = SeatType::parse(&row.seat_type)?;
        if row.seats <= 0 {
            return Err(ApiError::InvalidInput(format!(
                "в ряду {} некорректное число мест",
                row.row_label
            )));
        }
        for number in 1..=row.seats {
            row_labels.push(row.row_label.clone());
            numbers.push(number);
            seat_types.push(seat_type.as_str().to_string());
            prices.push(pricing::seat_price(seat_type));
        }
    }

    sqlx::query(
        "INSERT INTO seats (showtime_id, row_label, number, seat_type, price)
         SELECT $1, t.row_label, t.number, t.seat_type, t.price
         FROM UNNEST($2::text[], $3::int[], $4::text[], $5::bigint[])
              AS t(row_label, number, seat_type, price)",
    )
    .bind(showtime.id)
    .bind(&row_labels)
    .bind(&numbers)
    .bind(&seat_types)
    .bind(&prices)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    state.cache.invalidate_showtimes(req.movie_id).await;
    tracing::info!(
        "Showtime {} created with {} seats",
        showtime.id,
        row_labels.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "showtime": showtime,
            "seats_created": row_labels.len(),
        })),
    ))
}

/* ---------- SEATS ---------- */

// GET /api/showtimes/{id}/seats
async fn get_seat_availability(
    State(state): State<Arc<AppState>>,
    Path(showtime_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let cache_key = CacheService::seats_key(showtime_id);
    if let Some(cached) = state.cache.get_cached_json(&cache_key).await {
        return Ok(cached_response(cached, true));
    }

    let seat_map = SeatMap::new(state.db.clone());
    let seats = seat_map.availability(showtime_id).await?;

    let payload = json!({ "success": true, "seats": seats });
    let json = serde_json::to_string(&payload)
        .map_err(|e| ApiError::Internal(format!("failed to encode seats: {}", e)))?;
    state.cache.cache_seats(showtime_id, &json).await;

    Ok(cached_response(json, false))
}

/* ---------- CONCESSIONS ---------- */

// GET /api/concessions - статическое меню закусок
async fn list_concessions() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "version": pricing::PRICE_TABLE_VERSION,
        "items": pricing::CONCESSIONS,
    }))
}
