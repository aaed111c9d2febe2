use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::routes::configure;
use crate::sandbox::Scorer;

pub fn build_server(server_config: ServerConfig, scorer: web::Data<Scorer>) -> std::io::Result<Server> {
    let address = server_config
        .bind_address
        .unwrap_or("127.0.0.1".to_string());
    let port = server_config.bind_port.unwrap_or(12345);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(scorer.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind((address.as_str(), port))?
    .run();

    log::info!("Listening on {address}:{port}");
    Ok(server)
}
